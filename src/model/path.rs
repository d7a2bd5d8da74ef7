//! 远程路径模型

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

pub const DELIMITER: char = '/';

/// 路径类型集合（文件、目录、卷、符号链接可组合）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryType(u8);

impl EntryType {
    pub const FILE: EntryType = EntryType(1);
    pub const DIRECTORY: EntryType = EntryType(1 << 1);
    pub const VOLUME: EntryType = EntryType(1 << 2);
    pub const SYMBOLIC_LINK: EntryType = EntryType(1 << 3);

    pub const fn union(self, other: EntryType) -> EntryType {
        EntryType(self.0 | other.0)
    }

    pub const fn contains(self, other: EntryType) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: EntryType) -> EntryType {
        EntryType(self.0 & !other.0)
    }

    pub fn is_file(self) -> bool {
        self.contains(EntryType::FILE)
    }

    pub fn is_directory(self) -> bool {
        self.contains(EntryType::DIRECTORY)
    }

    pub fn is_symlink(self) -> bool {
        self.contains(EntryType::SYMBOLIC_LINK)
    }
}

impl std::ops::BitOr for EntryType {
    type Output = EntryType;

    fn bitor(self, rhs: EntryType) -> EntryType {
        self.union(rhs)
    }
}

/// Unix 权限位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission(pub u32);

impl Permission {
    pub fn mode(&self) -> u32 {
        self.0 & 0o7777
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.mode())
    }
}

/// 访问控制列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// (用户, 角色)
    pub grants: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
    /// 服务端 ETag（多数 S3 实现为 MD5）
    Etag,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub hash: String,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, hash: impl Into<String>) -> Self {
        Self {
            algorithm,
            hash: hash.into(),
        }
    }
}

/// 路径属性，可在原处修改而不影响路径标识
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAttributes {
    pub size: u64,
    /// 修改时间（Unix 时间戳，秒）
    pub modified: Option<i64>,
    pub created: Option<i64>,
    pub permission: Option<Permission>,
    pub acl: Option<Acl>,
    pub checksum: Option<Checksum>,
    pub etag: Option<String>,
    pub region: Option<String>,
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl PathAttributes {
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_modified(mut self, modified: i64) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// 路径的轻量规范键，用于缓存与相等比较
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathReference {
    path: String,
    directory: bool,
}

impl PathReference {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for PathReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.directory {
            write!(f, "[directory]-{}", self.path)
        } else {
            write!(f, "[file]-{}", self.path)
        }
    }
}

/// 远程路径，父路径独占持有
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    parent: Option<Box<Path>>,
    name: String,
    kind: EntryType,
    /// 符号链接目标（绝对或相对于所在目录）
    symlink_target: Option<String>,
    pub attributes: PathAttributes,
}

impl Path {
    pub fn root() -> Self {
        Self {
            parent: None,
            name: String::new(),
            kind: EntryType::DIRECTORY | EntryType::VOLUME,
            symlink_target: None,
            attributes: PathAttributes::default(),
        }
    }

    /// 由绝对路径字符串构建（中间段均视为目录）
    pub fn new(absolute: &str, kind: EntryType) -> Self {
        let segments: Vec<&str> = absolute.split(DELIMITER).filter(|s| !s.is_empty()).collect();
        let Some((last, ancestors)) = segments.split_last() else {
            return Self::root();
        };
        let mut parent = Self::root();
        for segment in ancestors {
            parent = parent.child(segment, EntryType::DIRECTORY);
        }
        parent.child(last, kind)
    }

    pub fn child(&self, name: &str, kind: EntryType) -> Path {
        Path {
            parent: Some(Box::new(self.clone())),
            name: name.trim_matches(DELIMITER).to_string(),
            kind,
            symlink_target: None,
            attributes: PathAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: PathAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_symlink_target(mut self, target: impl Into<String>) -> Self {
        self.kind = self.kind | EntryType::SYMBOLIC_LINK;
        self.symlink_target = Some(target.into());
        self
    }

    pub fn with_kind(mut self, kind: EntryType) -> Self {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntryType {
        self.kind
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.symlink_target.as_deref()
    }

    /// 链接目标的绝对路径，相对目标按链接所在目录解析
    pub fn symlink_destination(&self) -> Option<Path> {
        let target = self.symlink_target()?;
        let base = if target.starts_with(DELIMITER) {
            String::new()
        } else {
            self.parent().absolute()
        };
        let mut segments: Vec<&str> = Vec::new();
        for segment in base.split(DELIMITER).chain(target.split(DELIMITER)) {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                segment => segments.push(segment),
            }
        }
        Some(Path::new(&segments.join("/"), EntryType::FILE))
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }

    /// 根路径的父路径为其自身
    pub fn parent(&self) -> &Path {
        match &self.parent {
            Some(parent) => parent,
            None => self,
        }
    }

    /// 绝对路径总是由父链推导
    pub fn absolute(&self) -> String {
        match &self.parent {
            None => DELIMITER.to_string(),
            Some(parent) if parent.is_root() => format!("{}{}", DELIMITER, self.name),
            Some(parent) => format!("{}{}{}", parent.absolute(), DELIMITER, self.name),
        }
    }

    pub fn reference(&self) -> PathReference {
        PathReference {
            path: self.absolute(),
            directory: self.is_directory(),
        }
    }

    /// 扩展名（不含点）
    pub fn extension(&self) -> Option<&str> {
        let pos = self.name.rfind('.')?;
        if pos == 0 {
            return None;
        }
        Some(&self.name[pos + 1..])
    }

    /// 是否为 `ancestor` 的后代（不含相等）
    pub fn is_child(&self, ancestor: &Path) -> bool {
        if self.is_root() {
            return false;
        }
        let own = self.absolute();
        let other = ancestor.absolute();
        if other == DELIMITER.to_string() {
            return true;
        }
        own.starts_with(&format!("{}{}", other, DELIMITER))
    }

    /// 把 `from` 下的相对部分改挂到 `to` 之下
    pub fn rebase(&self, from: &Path, to: &Path) -> Path {
        if self.absolute() == from.absolute() {
            return to.clone().with_kind(self.kind).with_attributes(self.attributes.clone());
        }
        let from_abs = from.absolute();
        let own = self.absolute();
        let relative = own
            .strip_prefix(from_abs.as_str())
            .unwrap_or(own.as_str())
            .trim_start_matches(DELIMITER);
        let segments: Vec<&str> = relative.split(DELIMITER).filter(|s| !s.is_empty()).collect();
        let mut current = to.clone();
        if let Some((last, ancestors)) = segments.split_last() {
            for segment in ancestors {
                current = current.child(segment, EntryType::DIRECTORY);
            }
            current = current.child(last, self.kind);
        }
        current.attributes = self.attributes.clone();
        current
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.reference() == other.reference()
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference().hash(state);
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.absolute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symlink_destination_resolves_relative_targets() {
        let link = Path::new("/a/b/link", EntryType::FILE);
        let relative = link.clone().with_symlink_target("real.txt");
        assert_eq!(relative.symlink_destination().unwrap().absolute(), "/a/b/real.txt");
        let up = link.clone().with_symlink_target("../c/./d");
        assert_eq!(up.symlink_destination().unwrap().absolute(), "/a/c/d");
        let absolute = link.clone().with_symlink_target("/x/y");
        assert_eq!(absolute.symlink_destination().unwrap().absolute(), "/x/y");
        assert!(link.symlink_destination().is_none());
    }

    #[test]
    fn test_absolute_from_parent_chain() {
        let path = Path::new("/a/b/c.txt", EntryType::FILE);
        assert_eq!(path.absolute(), "/a/b/c.txt");
        assert_eq!(path.parent().absolute(), "/a/b");
        assert_eq!(path.parent().parent().parent().absolute(), "/");
        assert!(path.parent().is_directory());
    }

    #[test]
    fn test_root_is_own_parent() {
        let root = Path::root();
        assert_eq!(root.parent().absolute(), "/");
        assert!(root.parent().is_root());
        assert_eq!(Path::new("/", EntryType::DIRECTORY).absolute(), "/");
    }

    #[test]
    fn test_equality_ignores_attributes() {
        let a = Path::new("/a/file", EntryType::FILE);
        let b = Path::new("/a/file", EntryType::FILE)
            .with_attributes(PathAttributes::default().with_size(42));
        assert_eq!(a, b);
        assert_ne!(a, Path::new("/a/file", EntryType::DIRECTORY));
    }

    #[test]
    fn test_is_child() {
        let a = Path::new("/a", EntryType::DIRECTORY);
        assert!(Path::new("/a/b", EntryType::FILE).is_child(&a));
        assert!(!Path::new("/ab", EntryType::FILE).is_child(&a));
        assert!(!a.is_child(&a));
        assert!(a.is_child(&Path::root()));
    }

    #[test]
    fn test_rebase() {
        let from = Path::new("/src", EntryType::DIRECTORY);
        let to = Path::new("/backup/dst", EntryType::DIRECTORY);
        let file = Path::new("/src/x/y.bin", EntryType::FILE);
        let rebased = file.rebase(&from, &to);
        assert_eq!(rebased.absolute(), "/backup/dst/x/y.bin");
        assert!(rebased.is_file());
    }

    #[test]
    fn test_extension() {
        assert_eq!(Path::new("/a/b.tar.gz", EntryType::FILE).extension(), Some("gz"));
        assert_eq!(Path::new("/a/.profile", EntryType::FILE).extension(), None);
    }
}
