use crate::model::Path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 传输单元：远程路径与本地文件的配对
///
/// 复制传输没有本地一侧，目标由根目录映射推导。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferItem {
    pub remote: Path,
    pub local: Option<PathBuf>,
}

impl TransferItem {
    pub fn new(remote: Path, local: Option<PathBuf>) -> Self {
        Self { remote, local }
    }

    pub fn remote(remote: Path) -> Self {
        Self { remote, local: None }
    }

    /// 子项，本地路径随之拼接
    pub fn child(&self, remote: Path) -> TransferItem {
        let local = self.local.as_ref().map(|l| l.join(remote.name()));
        TransferItem { remote, local }
    }
}

impl fmt::Display for TransferItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.local {
            Some(local) => write!(f, "{} <-> {}", self.remote, local.display()),
            None => write!(f, "{}", self.remote),
        }
    }
}
