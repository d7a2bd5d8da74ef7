use super::path::{Path, PathReference};
use serde::{Deserialize, Serialize};

/// 单个目录的子项列表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributedList {
    items: Vec<Path>,
    /// 列表被取消截断（不完整，不可缓存）
    #[serde(default)]
    truncated: bool,
}

impl AttributedList {
    pub fn new(items: Vec<Path>) -> Self {
        Self {
            items,
            truncated: false,
        }
    }

    pub fn push(&mut self, item: Path) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = Path>) {
        self.items.extend(items);
    }

    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Path> {
        self.items.iter()
    }

    pub fn find(&self, reference: &PathReference) -> Option<&Path> {
        self.items.iter().find(|p| &p.reference() == reference)
    }

    /// 按名称查找（不区分文件或目录）
    pub fn find_by_name(&self, name: &str) -> Option<&Path> {
        self.items.iter().find(|p| p.name() == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.find_by_name(name).is_some()
    }
}

impl IntoIterator for AttributedList {
    type Item = Path;
    type IntoIter = std::vec::IntoIter<Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a AttributedList {
    type Item = &'a Path;
    type IntoIter = std::slice::Iter<'a, Path>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
