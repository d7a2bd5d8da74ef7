//! 根目录集合规范化：已包含在祖先中的子路径被剔除

use crate::model::Path;
use tracing::debug;

/// 剔除重复项和被其他根包含的后代，保持原有顺序
pub fn normalize<T>(roots: Vec<T>, key: impl Fn(&T) -> &Path) -> Vec<T> {
    let mut normalized: Vec<T> = Vec::with_capacity(roots.len());
    for root in roots {
        let path = key(&root);
        let covered = normalized
            .iter()
            .any(|kept| key(kept) == path || path.is_child(key(kept)));
        if covered {
            debug!("剔除已包含的根: {}", path);
            continue;
        }
        normalized.retain(|kept| {
            let contained = key(kept).is_child(path);
            if contained {
                debug!("剔除已包含的根: {}", key(kept));
            }
            !contained
        });
        normalized.push(root);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntryType;

    fn dir(path: &str) -> Path {
        Path::new(path, EntryType::DIRECTORY)
    }

    fn pairs(paths: &[(&str, &str)]) -> Vec<(Path, Path)> {
        paths.iter().map(|(s, d)| (dir(s), dir(d))).collect()
    }

    #[test]
    fn test_child_pruned_regardless_of_order() {
        let forward = normalize(pairs(&[("/a", "/x/a"), ("/a/b", "/x/b")]), |(s, _)| s);
        let backward = normalize(pairs(&[("/a/b", "/x/b"), ("/a", "/x/a")]), |(s, _)| s);
        assert_eq!(forward, pairs(&[("/a", "/x/a")]));
        assert_eq!(backward, pairs(&[("/a", "/x/a")]));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize(
            pairs(&[("/a", "/x"), ("/ab", "/y"), ("/c/d", "/z"), ("/c/d/e", "/w")]),
            |(s, _)| s,
        );
        assert_eq!(once.len(), 3);
        let twice = normalize(once.clone(), |(s, _)| s);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_duplicates_removed() {
        let roots = normalize(vec![dir("/a"), dir("/a")], |p| p);
        assert_eq!(roots.len(), 1);
    }
}
