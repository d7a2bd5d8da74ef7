//! 传输过滤器：按动作决定每个文件如何处理
//!
//! 动作到策略的映射是一张固定的表（`FilterStrategy::for_action`），
//! 所有策略共享同一个 `PathFilter` 实现。

pub mod compare;
pub mod rename;

use super::action::TransferAction;
use super::checksum;
use super::status::TransferStatus;
use super::target::{Target, TargetAccess, TargetMapping};
use super::transfer::TransferItem;
use crate::error::{BackgroundError, Result};
use crate::local;
use crate::model::{Checksum, HashAlgorithm, PathAttributes};
use crate::session::Session;
use async_trait::async_trait;
use compare::{Comparison, ComparisonService};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[async_trait]
pub trait TransferPathFilter: Send + Sync {
    /// 是否处理该文件
    async fn accept(&self, item: &TransferItem, parent: Option<&TransferStatus>) -> Result<bool>;

    /// 计算传输计划，不移动数据
    async fn prepare(
        &self,
        item: &TransferItem,
        parent: Option<&TransferStatus>,
    ) -> Result<TransferStatus>;

    /// 传输前的副作用
    async fn apply(&self, item: &TransferItem, status: &TransferStatus) -> Result<()>;

    /// 传输后的属性设置，失败只记录日志
    async fn complete(&self, item: &TransferItem, status: &TransferStatus);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    Overwrite,
    Resume,
    Rename,
    RenameExisting,
    Skip,
    Compare,
}

impl FilterStrategy {
    pub fn for_action(action: &TransferAction) -> FilterStrategy {
        match action.name() {
            "resume" => FilterStrategy::Resume,
            "rename" => FilterStrategy::Rename,
            "renameexisting" => FilterStrategy::RenameExisting,
            "skip" => FilterStrategy::Skip,
            "comparison" => FilterStrategy::Compare,
            _ => FilterStrategy::Overwrite,
        }
    }
}

/// 完成后同步的属性
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub timestamp: bool,
    pub permissions: bool,
}

pub struct PathFilter {
    strategy: FilterStrategy,
    mapping: TargetMapping,
    access: TargetAccess,
    /// 远程源会话（下载、复制），用于补全缺失的源属性
    source: Option<Arc<Session>>,
    options: FilterOptions,
    comparison: ComparisonService,
}

impl PathFilter {
    pub fn new(
        strategy: FilterStrategy,
        mapping: TargetMapping,
        access: TargetAccess,
        source: Option<Arc<Session>>,
        options: FilterOptions,
    ) -> Self {
        Self {
            strategy,
            mapping,
            access,
            source,
            options,
            comparison: ComparisonService::default(),
        }
    }

    pub fn strategy(&self) -> FilterStrategy {
        self.strategy
    }

    /// 父目录被改名时子项沿用新位置
    fn target(&self, item: &TransferItem, parent: Option<&TransferStatus>) -> Result<Target> {
        if let Some(renamed) = parent.and_then(|p| p.rename_target()) {
            return Ok(renamed.child(item.remote.name(), item.remote.kind()));
        }
        self.mapping.target(item)
    }

    async fn source_attributes(&self, item: &TransferItem) -> Result<PathAttributes> {
        if self.mapping.local_source() {
            let local = item
                .local
                .as_deref()
                .ok_or_else(|| BackgroundError::Transfer(format!("缺少本地路径: {}", item.remote)))?;
            return local::attributes(local)
                .await?
                .ok_or_else(|| BackgroundError::NotFound(local.display().to_string()));
        }
        let known = &item.remote.attributes;
        if known.modified.is_none() && known.size == 0 && !item.remote.is_directory() {
            if let Some(session) = &self.source {
                match session.attributes(&item.remote).await {
                    Ok(Some(attributes)) => return Ok(attributes),
                    Ok(None) => return Err(BackgroundError::NotFound(item.remote.to_string())),
                    Err(BackgroundError::Unsupported(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(known.clone())
    }

    /// 大小相同时，为本地一侧补算 blake3 以便与远程校验和比较
    async fn compare(
        &self,
        item: &TransferItem,
        target: &Target,
        source: &PathAttributes,
        existing: &PathAttributes,
    ) -> Result<Comparison> {
        let mut source = source.clone();
        let mut existing = existing.clone();
        let blake3 = |c: &Option<Checksum>| {
            c.as_ref()
                .is_some_and(|c| c.algorithm == HashAlgorithm::Blake3)
        };
        if source.size == existing.size {
            if blake3(&existing.checksum) && source.checksum.is_none() && self.mapping.local_source() {
                if let Some(local) = item.local.as_deref() {
                    let hash = checksum::hash_file(local).await?;
                    source.checksum = Some(Checksum::new(HashAlgorithm::Blake3, hash));
                }
            }
            if blake3(&source.checksum) && existing.checksum.is_none() {
                existing.checksum = self.access.checksum(target, &existing).await?;
            }
        }
        Ok(self.comparison.compare(item.remote.name(), &source, &existing))
    }
}

#[async_trait]
impl TransferPathFilter for PathFilter {
    async fn accept(&self, item: &TransferItem, parent: Option<&TransferStatus>) -> Result<bool> {
        if item.remote.is_directory() {
            return Ok(true);
        }
        let target = self.target(item, parent)?;
        match self.strategy {
            FilterStrategy::Skip => {
                if self.access.exists(&target).await? {
                    info!("目标已存在，跳过: {}", target);
                    return Ok(false);
                }
            }
            FilterStrategy::Resume => {
                if let Some(existing) = self.access.attributes(&target).await? {
                    let source = self.source_attributes(item).await?;
                    if existing.size == source.size {
                        info!("目标已完整，跳过: {}", target);
                        return Ok(false);
                    }
                }
            }
            FilterStrategy::Compare => {
                if let Some(existing) = self.access.attributes(&target).await? {
                    let source = self.source_attributes(item).await?;
                    match self.compare(item, &target, &source, &existing).await? {
                        Comparison::Equal | Comparison::TargetNewer => {
                            debug!("比较结果无需传输: {}", target);
                            return Ok(false);
                        }
                        Comparison::SourceNewer | Comparison::Different => {}
                    }
                }
            }
            _ => {}
        }
        Ok(true)
    }

    async fn prepare(
        &self,
        item: &TransferItem,
        parent: Option<&TransferStatus>,
    ) -> Result<TransferStatus> {
        let source = self.source_attributes(item).await?;
        let target = self.target(item, parent)?;
        let existing = self.access.attributes(&target).await?;
        // 按链接落地的条目不传输内容
        let is_file = !item.remote.is_directory() && !item.remote.is_symlink();

        let mut status = TransferStatus::new()
            .exists(existing.is_some())
            .with_length(if is_file { source.size } else { 0 })
            .with_timestamp(if self.options.timestamp { source.modified } else { None })
            .with_permission(if self.options.permissions { source.permission } else { None })
            .with_acl(source.acl.clone())
            .with_checksum(source.checksum.clone())
            .with_remote(source.clone());
        if parent.is_some_and(|p| p.is_rename()) {
            status = status.with_rename(target.clone());
        }

        let Some(existing) = existing else {
            return Ok(status);
        };

        match self.strategy {
            FilterStrategy::Resume if is_file => {
                if self.access.append_supported() && existing.size > 0 && existing.size < source.size {
                    info!("续传 {} 从 {} 字节", target, existing.size);
                    status = status
                        .with_append(true)
                        .with_offset(existing.size)
                        .with_length(source.size - existing.size);
                }
            }
            FilterStrategy::Rename => {
                let renamed = rename::unused_name(&self.access, &target).await?;
                debug!("改名写入 {} -> {}", target, renamed);
                status = status.with_rename(renamed).exists(false);
            }
            FilterStrategy::RenameExisting => {
                let displaced = rename::unused_name(&self.access, &target).await?;
                status = status.with_displaced(displaced);
            }
            _ => {}
        }
        Ok(status)
    }

    async fn apply(&self, item: &TransferItem, status: &TransferStatus) -> Result<()> {
        let target = self.mapping.resolve(item, status)?;
        if let Some(displaced) = status.displaced() {
            info!("移走已有目标 {} -> {}", target, displaced);
            self.access.rename(&target, displaced).await?;
            status.set_exists(false);
        }
        if let Target::Local(path) = &target {
            if let Some(parent) = path.parent() {
                local::mkdir(parent).await?;
            }
        }
        Ok(())
    }

    async fn complete(&self, item: &TransferItem, status: &TransferStatus) {
        let target = match self.mapping.resolve(item, status) {
            Ok(target) => target,
            Err(e) => {
                warn!("无法确定目标: {}", e);
                return;
            }
        };
        if let Some(timestamp) = status.timestamp() {
            match self.access.set_timestamp(&target, timestamp).await {
                Ok(()) => {}
                Err(BackgroundError::Unsupported(_)) => debug!("目标不支持设置修改时间: {}", target),
                Err(e) => warn!("设置修改时间失败 {}: {}", target, e),
            }
        }
        if let Some(permission) = status.permission() {
            match self.access.set_permission(&target, permission).await {
                Ok(()) => {}
                Err(BackgroundError::Unsupported(_)) => debug!("目标不支持设置权限: {}", target),
                Err(e) => warn!("设置权限 {} 失败 {}: {}", permission, target, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntryType, Path};
    use tempfile::TempDir;

    fn remote_file(path: &str, size: u64, modified: i64) -> Path {
        Path::new(path, EntryType::FILE)
            .with_attributes(PathAttributes::default().with_size(size).with_modified(modified))
    }

    fn download_filter(strategy: FilterStrategy) -> PathFilter {
        PathFilter::new(
            strategy,
            TargetMapping::Local,
            TargetAccess::Local,
            None,
            FilterOptions {
                timestamp: true,
                permissions: false,
            },
        )
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(FilterStrategy::for_action(&TransferAction::RESUME), FilterStrategy::Resume);
        assert_eq!(
            FilterStrategy::for_action(&TransferAction::RENAME_EXISTING),
            FilterStrategy::RenameExisting
        );
        assert_eq!(FilterStrategy::for_action(&TransferAction::COMPARISON), FilterStrategy::Compare);
        assert_eq!(
            FilterStrategy::for_action(&TransferAction::CALLBACK),
            FilterStrategy::Overwrite
        );
    }

    #[tokio::test]
    async fn test_overwrite_absent_target() {
        let dir = TempDir::new().unwrap();
        let item = TransferItem::new(remote_file("/r/a.bin", 10, 100), Some(dir.path().join("a.bin")));
        let filter = download_filter(FilterStrategy::Overwrite);

        assert!(filter.accept(&item, None).await.unwrap());
        let status = filter.prepare(&item, None).await.unwrap();
        assert!(!status.is_exists());
        assert!(!status.is_append());
        assert_eq!(status.length(), 10);
        assert_eq!(status.timestamp(), Some(100));
    }

    #[tokio::test]
    async fn test_resume_partial_and_complete_target() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.bin");
        std::fs::write(&local, vec![0u8; 4]).unwrap();
        let item = TransferItem::new(remote_file("/r/a.bin", 10, 100), Some(local.clone()));
        let filter = download_filter(FilterStrategy::Resume);

        assert!(filter.accept(&item, None).await.unwrap());
        let status = filter.prepare(&item, None).await.unwrap();
        assert!(status.is_append());
        assert_eq!(status.offset(), 4);
        assert_eq!(status.current(), 4);
        assert_eq!(status.length(), 6);

        std::fs::write(&local, vec![0u8; 10]).unwrap();
        assert!(!filter.accept(&item, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_skip_existing_file_but_not_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        let filter = download_filter(FilterStrategy::Skip);

        let file = TransferItem::new(remote_file("/r/a.bin", 1, 1), Some(dir.path().join("a.bin")));
        assert!(!filter.accept(&file, None).await.unwrap());

        let directory = TransferItem::new(Path::new("/r", EntryType::DIRECTORY), Some(dir.path().to_path_buf()));
        assert!(filter.accept(&directory, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_existing_moves_old_file() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.txt");
        std::fs::write(&local, b"old").unwrap();
        let item = TransferItem::new(remote_file("/r/a.txt", 3, 1), Some(local.clone()));
        let filter = download_filter(FilterStrategy::RenameExisting);

        let status = filter.prepare(&item, None).await.unwrap();
        assert!(status.is_exists());
        filter.apply(&item, &status).await.unwrap();
        assert!(!status.is_exists());
        assert!(!local.exists());
        let displaced = status.displaced().unwrap().local().unwrap();
        assert_eq!(std::fs::read(displaced).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_renamed_parent_is_inherited() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("d")).unwrap();
        let filter = download_filter(FilterStrategy::Rename);

        let parent = TransferItem::new(
            Path::new("/r/d", EntryType::DIRECTORY),
            Some(dir.path().join("d")),
        );
        let parent_status = filter.prepare(&parent, None).await.unwrap();
        assert!(parent_status.is_rename());
        assert!(!parent_status.is_exists());

        let child = TransferItem::new(remote_file("/r/d/f", 1, 1), Some(dir.path().join("d").join("f")));
        let status = filter.prepare(&child, Some(&parent_status)).await.unwrap();
        let renamed_parent = parent_status.rename_target().unwrap();
        assert_eq!(
            status.rename_target(),
            Some(renamed_parent.child("f", EntryType::FILE))
        );
    }

    #[tokio::test]
    async fn test_compare_uses_local_checksum() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.bin");
        std::fs::write(&local, b"same").unwrap();
        let filter = download_filter(FilterStrategy::Compare);

        let mut remote = remote_file("/r/a.bin", 4, 1);
        remote.attributes.checksum = Some(Checksum::new(
            HashAlgorithm::Blake3,
            checksum::calculate_hash(b"same"),
        ));
        let item = TransferItem::new(remote.clone(), Some(local.clone()));
        assert!(!filter.accept(&item, None).await.unwrap());

        remote.attributes.checksum = Some(Checksum::new(
            HashAlgorithm::Blake3,
            checksum::calculate_hash(b"diff"),
        ));
        let item = TransferItem::new(remote, Some(local));
        assert!(filter.accept(&item, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_sets_timestamp() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("a.bin");
        std::fs::write(&local, b"x").unwrap();
        let item = TransferItem::new(remote_file("/r/a.bin", 1, 1_500_000_000), Some(local.clone()));
        let filter = download_filter(FilterStrategy::Overwrite);

        let status = filter.prepare(&item, None).await.unwrap();
        filter.complete(&item, &status).await;
        let modified = local::attributes(&local).await.unwrap().unwrap().modified;
        assert_eq!(modified, Some(1_500_000_000));
    }
}
