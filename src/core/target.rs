//! 传输目标（本地文件或远程路径）及其访问方式

use super::cache::ListCache;
use super::status::TransferStatus;
use super::transfer::TransferItem;
use crate::error::{BackgroundError, Result};
use crate::local;
use crate::model::{Checksum, EntryType, HashAlgorithm, Path, PathAttributes, Permission};
use crate::session::Session;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Local(PathBuf),
    Remote(Path),
}

impl Target {
    pub fn name(&self) -> String {
        match self {
            Target::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            Target::Remote(path) => path.name().to_string(),
        }
    }

    /// 同目录下改名
    pub fn with_name(&self, name: &str) -> Target {
        match self {
            Target::Local(path) => Target::Local(path.with_file_name(name)),
            Target::Remote(path) => Target::Remote(path.parent().child(name, path.kind())),
        }
    }

    pub fn child(&self, name: &str, kind: EntryType) -> Target {
        match self {
            Target::Local(path) => Target::Local(path.join(name)),
            Target::Remote(path) => Target::Remote(path.child(name, kind)),
        }
    }

    pub fn local(&self) -> Option<&std::path::Path> {
        match self {
            Target::Local(path) => Some(path),
            Target::Remote(_) => None,
        }
    }

    pub fn remote(&self) -> Option<&Path> {
        match self {
            Target::Local(_) => None,
            Target::Remote(path) => Some(path),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local(path) => write!(f, "{}", path.display()),
            Target::Remote(path) => write!(f, "{}", path),
        }
    }
}

/// 目标侧的操作入口
#[derive(Clone)]
pub enum TargetAccess {
    Local,
    Remote {
        session: Arc<Session>,
        cache: Arc<ListCache>,
    },
}

impl TargetAccess {
    /// 目标属性，不存在返回 `None`
    pub async fn attributes(&self, target: &Target) -> Result<Option<PathAttributes>> {
        match (self, target) {
            (_, Target::Local(path)) => local::attributes(path).await,
            (TargetAccess::Remote { session, cache }, Target::Remote(path)) => {
                if !cache.find(session, path).await? {
                    return Ok(None);
                }
                if let Some(found) = cache.lookup(path) {
                    if found.attributes.modified.is_some() || path.is_directory() {
                        return Ok(Some(found.attributes));
                    }
                }
                match session.attributes(path).await {
                    Err(BackgroundError::Unsupported(_)) => Ok(Some(PathAttributes::default())),
                    other => other,
                }
            }
            (TargetAccess::Local, Target::Remote(path)) => Err(BackgroundError::Unsupported(
                format!("本地访问远程路径: {}", path),
            )),
        }
    }

    pub async fn exists(&self, target: &Target) -> Result<bool> {
        match (self, target) {
            (_, Target::Local(path)) => Ok(local::exists(path).await),
            (TargetAccess::Remote { session, cache }, Target::Remote(path)) => {
                cache.find(session, path).await
            }
            (TargetAccess::Local, Target::Remote(path)) => Err(BackgroundError::Unsupported(
                format!("本地访问远程路径: {}", path),
            )),
        }
    }

    /// 目标不存在、为空目录或零长度文件
    pub async fn is_empty(&self, target: &Target) -> Result<bool> {
        match (self, target) {
            (_, Target::Local(path)) => match local::kind(path).await? {
                None => Ok(true),
                Some(kind) if kind.is_directory() => Ok(local::list(path).await?.is_empty()),
                Some(_) => Ok(local::attributes(path).await?.map_or(true, |a| a.size == 0)),
            },
            (TargetAccess::Remote { session, cache }, Target::Remote(path)) => {
                let Some(attributes) = self.attributes(target).await? else {
                    return Ok(true);
                };
                if path.is_directory() {
                    let listener = crate::session::feature::DisabledListProgressListener;
                    return Ok(cache.list(session, path, &listener).await?.is_empty());
                }
                Ok(attributes.size == 0)
            }
            (TargetAccess::Local, Target::Remote(path)) => Err(BackgroundError::Unsupported(
                format!("本地访问远程路径: {}", path),
            )),
        }
    }

    /// 写入端是否支持追加
    pub fn append_supported(&self) -> bool {
        match self {
            TargetAccess::Local => true,
            TargetAccess::Remote { session, .. } => session
                .writer()
                .map(|w| w.append_supported())
                .unwrap_or(false),
        }
    }

    pub async fn rename(&self, from: &Target, to: &Target) -> Result<()> {
        match (self, from, to) {
            (_, Target::Local(from), Target::Local(to)) => local::rename(from, to).await,
            (TargetAccess::Remote { session, cache }, Target::Remote(from), Target::Remote(to)) => {
                let mover = session
                    .mover()
                    .ok_or_else(|| BackgroundError::Unsupported("move".into()))?;
                mover.rename(from, to).await?;
                cache.invalidate(from.parent());
                cache.invalidate(to.parent());
                Ok(())
            }
            _ => Err(BackgroundError::Unsupported(format!("重命名 {} -> {}", from, to))),
        }
    }

    pub async fn set_timestamp(&self, target: &Target, modified: i64) -> Result<()> {
        match (self, target) {
            (_, Target::Local(path)) => local::set_timestamp(path, modified).await,
            (TargetAccess::Remote { session, .. }, Target::Remote(path)) => match session.timestamp_setter() {
                Some(setter) => setter.set_timestamp(path, modified).await,
                None => Err(BackgroundError::Unsupported("timestamp".into())),
            },
            _ => Err(BackgroundError::Unsupported("timestamp".into())),
        }
    }

    pub async fn set_permission(&self, target: &Target, permission: Permission) -> Result<()> {
        match (self, target) {
            (_, Target::Local(path)) => local::set_permission(path, permission).await,
            (TargetAccess::Remote { session, .. }, Target::Remote(path)) => match session.permission_setter() {
                Some(setter) => setter.set_permission(path, permission).await,
                None => Err(BackgroundError::Unsupported("permission".into())),
            },
            _ => Err(BackgroundError::Unsupported("permission".into())),
        }
    }

    /// 本地文件计算 blake3，远程目标使用已知的校验和
    pub async fn checksum(
        &self,
        target: &Target,
        attributes: &PathAttributes,
    ) -> Result<Option<Checksum>> {
        match target {
            Target::Local(path) => {
                let hash = super::checksum::hash_file(path).await?;
                Ok(Some(Checksum::new(HashAlgorithm::Blake3, hash)))
            }
            Target::Remote(_) => Ok(attributes.checksum.clone()),
        }
    }
}

/// 条目到目标的映射
#[derive(Debug, Clone)]
pub enum TargetMapping {
    /// 下载：目标为条目的本地路径
    Local,
    /// 上传：目标为条目的远程路径
    Remote,
    /// 复制：按根目录对应关系映射到目标会话
    Rebase(Vec<(Path, Path)>),
}

impl TargetMapping {
    pub fn target(&self, item: &TransferItem) -> Result<Target> {
        match self {
            TargetMapping::Local => item
                .local
                .clone()
                .map(Target::Local)
                .ok_or_else(|| BackgroundError::Transfer(format!("缺少本地路径: {}", item.remote))),
            TargetMapping::Remote => Ok(Target::Remote(item.remote.clone())),
            TargetMapping::Rebase(roots) => roots
                .iter()
                .find(|(source, _)| item.remote == *source || item.remote.is_child(source))
                .map(|(source, destination)| Target::Remote(item.remote.rebase(source, destination)))
                .ok_or_else(|| BackgroundError::Transfer(format!("没有对应的目标: {}", item.remote))),
        }
    }

    /// 优先使用状态中的替代目标
    pub fn resolve(&self, item: &TransferItem, status: &TransferStatus) -> Result<Target> {
        match status.rename_target() {
            Some(target) => Ok(target),
            None => self.target(item),
        }
    }

    /// 源是否为本地文件
    pub fn local_source(&self) -> bool {
        matches!(self, TargetMapping::Remote)
    }
}
