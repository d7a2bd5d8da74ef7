//! 会话能力（按特性类型查找的协议实现）

use crate::error::Result;
use crate::model::{AttributedList, Path, PathAttributes, Permission};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

/// 数据流（读取端产出，写入端消费）
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 能力类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Read,
    Write,
    List,
    Find,
    Attributes,
    Delete,
    Copy,
    Move,
    Directory,
    Symlink,
    Timestamp,
    UnixPermission,
}

/// 列表分块回调，返回错误（通常为取消）时截断列表
pub trait ListProgressListener: Send + Sync {
    fn chunk(&self, directory: &Path, list: &AttributedList) -> Result<()>;
}

/// 不关心进度的列表回调
pub struct DisabledListProgressListener;

impl ListProgressListener for DisabledListProgressListener {
    fn chunk(&self, _directory: &Path, _list: &AttributedList) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Reader: Send + Sync {
    /// 从 `offset` 开始读取文件内容
    async fn read(&self, file: &Path, offset: u64) -> Result<ByteStream>;
}

#[async_trait]
pub trait Writer: Send + Sync {
    /// 写入数据流，返回写入字节数
    async fn write(&self, file: &Path, append: bool, data: ByteStream) -> Result<u64>;

    /// 是否支持追加写入（断点续传）
    fn append_supported(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait Lister: Send + Sync {
    async fn list(
        &self,
        directory: &Path,
        listener: &dyn ListProgressListener,
    ) -> Result<AttributedList>;
}

#[async_trait]
pub trait Finder: Send + Sync {
    async fn find(&self, file: &Path) -> Result<bool>;
}

#[async_trait]
pub trait AttributesFinder: Send + Sync {
    async fn find(&self, file: &Path) -> Result<PathAttributes>;
}

#[async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, files: &[Path]) -> Result<()>;
}

/// 服务端复制
#[async_trait]
pub trait Copier: Send + Sync {
    async fn copy(&self, source: &Path, target: &Path) -> Result<()>;
}

#[async_trait]
pub trait Mover: Send + Sync {
    async fn rename(&self, source: &Path, target: &Path) -> Result<()>;
}

#[async_trait]
pub trait DirectoryMaker: Send + Sync {
    async fn mkdir(&self, directory: &Path) -> Result<()>;
}

#[async_trait]
pub trait SymlinkMaker: Send + Sync {
    async fn symlink(&self, link: &Path, target: &str) -> Result<()>;
}

#[async_trait]
pub trait TimestampSetter: Send + Sync {
    async fn set_timestamp(&self, file: &Path, modified: i64) -> Result<()>;
}

#[async_trait]
pub trait PermissionSetter: Send + Sync {
    async fn set_permission(&self, file: &Path, permission: Permission) -> Result<()>;
}

/// 能力实现，由 `SessionBackend::feature` 返回
#[derive(Clone)]
pub enum Capability {
    Read(Arc<dyn Reader>),
    Write(Arc<dyn Writer>),
    List(Arc<dyn Lister>),
    Find(Arc<dyn Finder>),
    Attributes(Arc<dyn AttributesFinder>),
    Delete(Arc<dyn Deleter>),
    Copy(Arc<dyn Copier>),
    Move(Arc<dyn Mover>),
    Directory(Arc<dyn DirectoryMaker>),
    Symlink(Arc<dyn SymlinkMaker>),
    Timestamp(Arc<dyn TimestampSetter>),
    UnixPermission(Arc<dyn PermissionSetter>),
}

impl Capability {
    pub fn feature(&self) -> Feature {
        match self {
            Capability::Read(_) => Feature::Read,
            Capability::Write(_) => Feature::Write,
            Capability::List(_) => Feature::List,
            Capability::Find(_) => Feature::Find,
            Capability::Attributes(_) => Feature::Attributes,
            Capability::Delete(_) => Feature::Delete,
            Capability::Copy(_) => Feature::Copy,
            Capability::Move(_) => Feature::Move,
            Capability::Directory(_) => Feature::Directory,
            Capability::Symlink(_) => Feature::Symlink,
            Capability::Timestamp(_) => Feature::Timestamp,
            Capability::UnixPermission(_) => Feature::UnixPermission,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({:?})", self.feature())
    }
}
