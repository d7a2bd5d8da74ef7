//! 单个文件的传输计划与进度

use super::target::Target;
use crate::error::{BackgroundError, Result};
use crate::model::{Acl, Checksum, Path, PathAttributes, Permission};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 替代目标
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rename {
    pub remote: Option<Path>,
    pub local: Option<PathBuf>,
}

/// 由过滤器 `prepare` 生成，传输过程中更新，不跨文件复用
#[derive(Debug, Default)]
pub struct TransferStatus {
    exists: AtomicBool,
    append: bool,
    skipped: bool,
    /// 续传起点
    offset: u64,
    /// 本次需传输的字节数
    length: u64,
    current: AtomicU64,
    canceled: AtomicBool,
    complete: AtomicBool,
    rename: Rename,
    /// 需要先移走的已有目标
    displaced: Option<Target>,
    /// 源属性快照
    remote: PathAttributes,
    permission: Option<Permission>,
    acl: Option<Acl>,
    timestamp: Option<i64>,
    mime: Option<String>,
    checksum: Option<Checksum>,
    parameters: HashMap<String, String>,
}

impl TransferStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(self, exists: bool) -> Self {
        self.exists.store(exists, Ordering::SeqCst);
        self
    }

    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn with_skipped(mut self, skipped: bool) -> Self {
        self.skipped = skipped;
        self
    }

    /// 设置续传起点，同时作为已传输字节
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self.current.store(offset, Ordering::SeqCst);
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = length;
        self
    }

    pub fn with_rename(mut self, target: Target) -> Self {
        match target {
            Target::Remote(path) => self.rename.remote = Some(path),
            Target::Local(path) => self.rename.local = Some(path),
        }
        self
    }

    pub fn with_displaced(mut self, target: Target) -> Self {
        self.displaced = Some(target);
        self
    }

    pub fn with_remote(mut self, attributes: PathAttributes) -> Self {
        self.remote = attributes;
        self
    }

    pub fn with_permission(mut self, permission: Option<Permission>) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_acl(mut self, acl: Option<Acl>) -> Self {
        self.acl = acl;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<i64>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_mime(mut self, mime: Option<String>) -> Self {
        self.mime = mime;
        self
    }

    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn is_exists(&self) -> bool {
        self.exists.load(Ordering::SeqCst)
    }

    pub fn set_exists(&self, exists: bool) {
        self.exists.store(exists, Ordering::SeqCst);
    }

    pub fn is_append(&self) -> bool {
        self.append
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn set_current(&self, current: u64) {
        self.current.store(current, Ordering::SeqCst);
    }

    /// 记录新传输的字节
    pub fn progress(&self, bytes: u64) {
        self.current.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn is_rename(&self) -> bool {
        self.rename.remote.is_some() || self.rename.local.is_some()
    }

    pub fn rename(&self) -> &Rename {
        &self.rename
    }

    pub fn rename_target(&self) -> Option<Target> {
        if let Some(remote) = &self.rename.remote {
            return Some(Target::Remote(remote.clone()));
        }
        self.rename.local.clone().map(Target::Local)
    }

    pub fn displaced(&self) -> Option<&Target> {
        self.displaced.as_ref()
    }

    pub fn remote(&self) -> &PathAttributes {
        &self.remote
    }

    pub fn permission(&self) -> Option<Permission> {
        self.permission
    }

    pub fn acl(&self) -> Option<&Acl> {
        self.acl.as_ref()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn set_canceled(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn set_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// 已取消时返回取消错误
    pub fn validate(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(BackgroundError::Canceled);
        }
        Ok(())
    }
}
