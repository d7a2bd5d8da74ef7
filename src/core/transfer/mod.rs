//! 传输：一组根条目及其下载、上传、复制实现
//!
//! 三种传输共用同一套流程，差异集中在 `TransferKind`：
//! 源从哪里列出和读取、目标写到哪里。

pub mod bandwidth;
pub mod item;
pub mod normalizer;
pub mod record;
pub mod stream;

pub use bandwidth::BandwidthThrottle;
pub use item::TransferItem;
pub use record::TransferRecord;

use super::action::TransferAction;
use super::cache::ListCache;
use super::filter::{FilterOptions, FilterStrategy, PathFilter};
use super::prompt::TransferPrompt;
use super::status::TransferStatus;
use super::target::{Target, TargetAccess, TargetMapping};
use crate::config::{DirectionConfig, TransferConfig};
use crate::error::{BackgroundError, Result};
use crate::local;
use crate::model::{EntryType, Host, Path};
use crate::session::{ByteStream, ListProgressListener, Session};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    Download,
    Upload,
    Copy,
}

/// 复制的目标会话与根目录映射
pub struct CopyDestination {
    pub session: Arc<Session>,
    pub cache: Arc<ListCache>,
    /// 源根目录 -> 目标根目录
    pub mapping: Vec<(Path, Path)>,
}

pub enum TransferKind {
    /// 远程 -> 本地
    Download,
    /// 本地 -> 远程
    Upload,
    /// 远程 -> 远程
    Copy(CopyDestination),
}

/// 累计字节数，`None` 表示尚未知
#[derive(Debug, Default)]
pub struct TransferProgress {
    size: Mutex<Option<u64>>,
    transferred: Mutex<Option<u64>>,
}

impl TransferProgress {
    pub fn add_size(&self, bytes: u64) {
        let mut size = self.size.lock().unwrap_or_else(PoisonError::into_inner);
        *size = Some(size.unwrap_or(0) + bytes);
    }

    pub fn add_transferred(&self, bytes: u64) {
        let mut transferred = self
            .transferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *transferred = Some(transferred.unwrap_or(0) + bytes);
    }

    pub fn size(&self) -> Option<u64> {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transferred(&self) -> Option<u64> {
        *self
            .transferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn restore(&self, size: Option<u64>, transferred: Option<u64>) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = size;
        *self
            .transferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = transferred;
    }
}

#[derive(Debug, Default)]
struct TransferState {
    running: bool,
    /// 上次停止的时间
    timestamp: Option<DateTime<Utc>>,
}

pub struct Transfer {
    uuid: String,
    kind: TransferKind,
    host: Host,
    roots: Vec<TransferItem>,
    config: DirectionConfig,
    skip: Option<Regex>,
    progress: Arc<TransferProgress>,
    state: Mutex<TransferState>,
    bandwidth: Arc<BandwidthThrottle>,
}

fn compile_skip(pattern: &str) -> Option<Regex> {
    if pattern.is_empty() {
        return None;
    }
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!("跳过规则无效，已忽略: {}", e);
            None
        }
    }
}

impl Transfer {
    fn with_kind(
        kind: TransferKind,
        host: Host,
        roots: Vec<TransferItem>,
        direction: &DirectionConfig,
        config: &TransferConfig,
    ) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            kind,
            host,
            roots: normalizer::normalize(roots, |item| &item.remote),
            skip: compile_skip(&direction.skip_pattern),
            config: direction.clone(),
            progress: Arc::new(TransferProgress::default()),
            state: Mutex::new(TransferState::default()),
            bandwidth: Arc::new(BandwidthThrottle::new(config.queue.bandwidth)),
        }
    }

    pub fn download(host: Host, roots: Vec<TransferItem>, config: &TransferConfig) -> Self {
        Self::with_kind(TransferKind::Download, host, roots, &config.download, config)
    }

    pub fn upload(host: Host, roots: Vec<TransferItem>, config: &TransferConfig) -> Self {
        Self::with_kind(TransferKind::Upload, host, roots, &config.upload, config)
    }

    /// 复制到目标会话，`mapping` 为源根目录与目标根目录的对应关系
    pub fn copy(
        host: Host,
        mapping: Vec<(Path, Path)>,
        destination: Arc<Session>,
        cache: Arc<ListCache>,
        config: &TransferConfig,
    ) -> Self {
        let mapping = normalizer::normalize(mapping, |(source, _)| source);
        let roots = mapping
            .iter()
            .map(|(source, _)| TransferItem::remote(source.clone()))
            .collect();
        let kind = TransferKind::Copy(CopyDestination {
            session: destination,
            cache,
            mapping,
        });
        Self::with_kind(kind, host, roots, &config.copy, config)
    }

    pub(crate) fn with_uuid(mut self, uuid: String) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.kind {
            TransferKind::Download => TransferType::Download,
            TransferKind::Upload => TransferType::Upload,
            TransferKind::Copy(_) => TransferType::Copy,
        }
    }

    pub fn kind(&self) -> &TransferKind {
        &self.kind
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn roots(&self) -> &[TransferItem] {
        &self.roots
    }

    pub fn config(&self) -> &DirectionConfig {
        &self.config
    }

    pub fn bandwidth(&self) -> &BandwidthThrottle {
        &self.bandwidth
    }

    pub fn name(&self) -> String {
        match self.roots.as_slice() {
            [] => String::new(),
            [root] => root.remote.name().to_string(),
            [root, rest @ ..] => format!("{} 等 {} 项", root.remote.name(), rest.len() + 1),
        }
    }

    /// 条目到目标的映射
    pub fn mapping(&self) -> TargetMapping {
        match &self.kind {
            TransferKind::Download => TargetMapping::Local,
            TransferKind::Upload => TargetMapping::Remote,
            TransferKind::Copy(destination) => TargetMapping::Rebase(destination.mapping.clone()),
        }
    }

    /// 目标侧访问，上传时目标即当前会话
    pub fn access(&self, session: &Arc<Session>, cache: &Arc<ListCache>) -> TargetAccess {
        match &self.kind {
            TransferKind::Download => TargetAccess::Local,
            TransferKind::Upload => TargetAccess::Remote {
                session: session.clone(),
                cache: cache.clone(),
            },
            TransferKind::Copy(destination) => TargetAccess::Remote {
                session: destination.session.clone(),
                cache: destination.cache.clone(),
            },
        }
    }

    fn target_session<'a>(&'a self, session: &'a Arc<Session>) -> &'a Arc<Session> {
        match &self.kind {
            TransferKind::Copy(destination) => &destination.session,
            _ => session,
        }
    }

    fn target_cache<'a>(&'a self, cache: &'a ListCache) -> Option<&'a ListCache> {
        match &self.kind {
            TransferKind::Download => None,
            TransferKind::Upload => Some(cache),
            TransferKind::Copy(destination) => Some(&destination.cache),
        }
    }

    /// 列出目录的直接子项（已按跳过规则过滤）
    pub async fn list(
        &self,
        session: &Session,
        cache: &ListCache,
        directory: &TransferItem,
        listener: &dyn ListProgressListener,
    ) -> Result<Vec<TransferItem>> {
        let children = match self.kind {
            TransferKind::Upload => self.list_local(directory).await?,
            _ => cache
                .list(session, &directory.remote, listener)
                .await?
                .into_iter()
                .map(|remote| directory.child(remote))
                .collect(),
        };
        Ok(children
            .into_iter()
            .filter(|child| !self.is_skipped(child))
            .map(|child| self.resolve_link(child))
            .collect())
    }

    async fn list_local(&self, directory: &TransferItem) -> Result<Vec<TransferItem>> {
        let local = directory
            .local
            .as_deref()
            .ok_or_else(|| BackgroundError::Transfer(format!("缺少本地路径: {}", directory.remote)))?;
        Ok(local::list(local)
            .await?
            .into_iter()
            .map(|entry| {
                let mut remote = directory
                    .remote
                    .child(&entry.name, entry.kind)
                    .with_attributes(entry.attributes);
                if let Some(target) = &entry.symlink_target {
                    remote = remote.with_symlink_target(target.to_string_lossy());
                }
                TransferItem::new(remote, Some(entry.path))
            })
            .collect())
    }

    fn is_skipped(&self, item: &TransferItem) -> bool {
        let skipped = self
            .skip
            .as_ref()
            .is_some_and(|regex| regex.is_match(item.remote.name()));
        if skipped {
            debug!("按规则跳过: {}", item.remote);
        }
        skipped
    }

    /// 指向根目录集合内部的链接按链接落地，其余链接跟随
    fn resolve_link(&self, mut item: TransferItem) -> TransferItem {
        if !item.remote.is_symlink() {
            return item;
        }
        let kind = if self.link_target(&item).is_some() {
            debug!("链接指向传输范围内，不跟随: {}", item.remote);
            EntryType::FILE | EntryType::SYMBOLIC_LINK
        } else {
            item.remote.kind().without(EntryType::SYMBOLIC_LINK)
        };
        item.remote = item.remote.with_kind(kind);
        item
    }

    /// 链接在目标侧应指向的位置，链接不在根目录集合内时返回 `None`
    fn link_target(&self, item: &TransferItem) -> Option<Target> {
        let destination = item.remote.symlink_target()?;
        match &self.kind {
            TransferKind::Download => {
                let linked = item.remote.symlink_destination()?;
                self.roots.iter().find_map(|root| {
                    let local = root.local.as_ref()?;
                    relative_to(&linked, &root.remote).map(|rel| Target::Local(join(local, &rel)))
                })
            }
            TransferKind::Upload => {
                let mut linked = PathBuf::from(destination);
                if linked.is_relative() {
                    let parent = item.local.as_ref()?.parent()?;
                    linked = parent.join(linked);
                }
                self.roots.iter().find_map(|root| {
                    let rel = linked.strip_prefix(root.local.as_ref()?).ok()?;
                    let mut remote = root.remote.clone();
                    for segment in rel.iter() {
                        remote = remote.child(&segment.to_string_lossy(), EntryType::DIRECTORY);
                    }
                    Some(Target::Remote(remote.with_kind(EntryType::FILE)))
                })
            }
            TransferKind::Copy(copy) => {
                let linked = item.remote.symlink_destination()?;
                copy.mapping.iter().find_map(|(source, target)| {
                    (linked == *source || linked.is_child(source))
                        .then(|| Target::Remote(linked.rebase(source, target)))
                })
            }
        }
    }

    /// 决定本次运行的动作
    ///
    /// 优先级：强制续传、重新加载动作、默认动作。默认动作为询问时，
    /// 若所有根目标均不存在或为空则直接覆盖，不再询问。
    pub async fn action(
        &self,
        session: &Arc<Session>,
        cache: &Arc<ListCache>,
        resume: bool,
        reload: bool,
        prompt: &dyn TransferPrompt,
    ) -> Result<TransferAction> {
        let action = if resume {
            TransferAction::RESUME
        } else if reload {
            configured(&self.config.reload_action)
        } else {
            configured(&self.config.action)
        };
        let action = if action == TransferAction::CALLBACK {
            self.ask(session, cache, prompt).await?
        } else {
            action
        };
        if action == TransferAction::CANCEL {
            info!("用户取消传输: {}", self.name());
            return Err(BackgroundError::Canceled);
        }
        Ok(action)
    }

    async fn ask(
        &self,
        session: &Arc<Session>,
        cache: &Arc<ListCache>,
        prompt: &dyn TransferPrompt,
    ) -> Result<TransferAction> {
        let access = self.access(session, cache);
        let mapping = self.mapping();
        for root in &self.roots {
            let target = mapping.target(root)?;
            if !access.is_empty(&target).await? {
                debug!("目标已有内容，询问动作: {}", target);
                let answer = prompt.prompt(&self.roots)?;
                if answer == TransferAction::CALLBACK {
                    return Ok(TransferAction::OVERWRITE);
                }
                return Ok(answer);
            }
        }
        info!("目标均不存在或为空，直接覆盖");
        Ok(TransferAction::OVERWRITE)
    }

    /// 动作对应的过滤器
    pub fn filter(
        &self,
        session: &Arc<Session>,
        cache: &Arc<ListCache>,
        action: &TransferAction,
    ) -> PathFilter {
        let source = match self.kind {
            TransferKind::Upload => None,
            _ => Some(session.clone()),
        };
        PathFilter::new(
            FilterStrategy::for_action(action),
            self.mapping(),
            self.access(session, cache),
            source,
            FilterOptions {
                timestamp: self.config.timestamp,
                permissions: self.config.permissions,
            },
        )
    }

    /// 传输单个条目：创建目录、落地链接或复制内容
    pub async fn transfer(
        &self,
        session: &Arc<Session>,
        cache: &ListCache,
        item: &TransferItem,
        status: &Arc<TransferStatus>,
    ) -> Result<()> {
        status.validate()?;
        let target = self.mapping().resolve(item, status)?;
        if item.remote.is_symlink() {
            if let Some(link) = self.link_target(item) {
                self.symlink(session, cache, &target, &link).await?;
                status.set_exists(true);
                return Ok(());
            }
        }
        if item.remote.is_directory() {
            return self.mkdir(session, cache, &target, status).await;
        }
        self.copy_file(session, item, &target, status).await?;
        if let (Some(cache), Target::Remote(path)) = (self.target_cache(cache), &target) {
            cache.invalidate(path.parent());
        }
        Ok(())
    }

    async fn mkdir(
        &self,
        session: &Arc<Session>,
        cache: &ListCache,
        target: &Target,
        status: &TransferStatus,
    ) -> Result<()> {
        if status.is_exists() {
            debug!("目录已存在: {}", target);
            return Ok(());
        }
        match target {
            Target::Local(path) => local::mkdir(path).await?,
            Target::Remote(path) => {
                let maker = self
                    .target_session(session)
                    .directory_maker()
                    .ok_or_else(|| BackgroundError::Unsupported("mkdir".into()))?;
                maker.mkdir(path).await?;
                if let Some(cache) = self.target_cache(cache) {
                    cache.invalidate(path.parent());
                }
            }
        }
        debug!("已创建目录: {}", target);
        status.set_exists(true);
        Ok(())
    }

    async fn symlink(
        &self,
        session: &Arc<Session>,
        cache: &ListCache,
        link: &Target,
        destination: &Target,
    ) -> Result<()> {
        match (link, destination) {
            (Target::Local(link), Target::Local(destination)) => {
                local::symlink(link, destination).await?
            }
            (Target::Remote(link), Target::Remote(destination)) => {
                let maker = self
                    .target_session(session)
                    .symlink_maker()
                    .ok_or_else(|| BackgroundError::Unsupported("symlink".into()))?;
                maker.symlink(link, &destination.absolute()).await?;
                if let Some(cache) = self.target_cache(cache) {
                    cache.invalidate(link.parent());
                }
            }
            _ => {
                return Err(BackgroundError::Unsupported(format!(
                    "链接 {} -> {}",
                    link, destination
                )))
            }
        }
        debug!("已创建链接: {} -> {}", link, destination);
        Ok(())
    }

    async fn copy_file(
        &self,
        session: &Arc<Session>,
        item: &TransferItem,
        target: &Target,
        status: &Arc<TransferStatus>,
    ) -> Result<()> {
        let append = status.is_append();
        if let (TransferKind::Copy(destination), Target::Remote(path)) = (&self.kind, target) {
            if Arc::ptr_eq(session, &destination.session) && !append {
                if let Some(copier) = session.copier() {
                    debug!("服务端复制: {} -> {}", item.remote, path);
                    copier.copy(&item.remote, path).await?;
                    status.progress(status.length());
                    self.progress.add_transferred(status.length());
                    return Ok(());
                }
            }
        }

        let source = self.open(session, item, status.offset()).await?;
        let data = stream::counting(
            source,
            status.clone(),
            self.progress.clone(),
            self.bandwidth.clone(),
        );
        let written = match target {
            Target::Local(path) => local::write(path, data, append).await?,
            Target::Remote(path) => {
                let writer = self
                    .target_session(session)
                    .writer()
                    .ok_or_else(|| BackgroundError::Unsupported("write".into()))?;
                writer.write(path, append, data).await?
            }
        };
        status.validate()?;
        debug!("已写入 {} 字节: {}", written, target);
        Ok(())
    }

    async fn open(&self, session: &Session, item: &TransferItem, offset: u64) -> Result<ByteStream> {
        match self.kind {
            TransferKind::Upload => {
                let local = item
                    .local
                    .as_deref()
                    .ok_or_else(|| BackgroundError::Transfer(format!("缺少本地路径: {}", item.remote)))?;
                local::read(local, offset).await
            }
            _ => {
                let reader = session
                    .reader()
                    .ok_or_else(|| BackgroundError::Unsupported("read".into()))?;
                reader.read(&item.remote, offset).await
            }
        }
    }

    pub fn add_size(&self, bytes: u64) {
        self.progress.add_size(bytes);
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.progress.add_transferred(bytes);
    }

    pub fn size(&self) -> Option<u64> {
        self.progress.size()
    }

    pub fn transferred(&self) -> Option<u64> {
        self.progress.transferred()
    }

    pub fn start(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).running = true;
        self.bandwidth.restart();
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = false;
        state.timestamp = Some(Utc::now());
    }

    /// 清空累计字节数，重新统计
    pub fn reset(&self) {
        self.progress.restore(None, None);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).running
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).timestamp
    }

    /// 已停止且所有字节均已传输
    pub fn is_complete(&self) -> bool {
        if self.is_running() {
            return false;
        }
        matches!(
            (self.size(), self.transferred()),
            (Some(size), Some(transferred)) if size == transferred
        )
    }

    pub fn record(&self) -> TransferRecord {
        TransferRecord::from_transfer(self)
    }

    pub(crate) fn restore_progress(
        &self,
        size: Option<u64>,
        transferred: Option<u64>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.progress.restore(size, transferred);
        self.state.lock().unwrap_or_else(PoisonError::into_inner).timestamp = timestamp;
    }
}

fn configured(name: &str) -> TransferAction {
    TransferAction::for_name(name).unwrap_or_else(|| {
        warn!("未知的传输动作 {}，使用覆盖", name);
        TransferAction::OVERWRITE
    })
}

/// `path` 相对 `ancestor` 的部分，不在其下时返回 `None`
fn relative_to(path: &Path, ancestor: &Path) -> Option<String> {
    if path == ancestor || path.absolute() == ancestor.absolute() {
        return Some(String::new());
    }
    if !path.is_child(ancestor) {
        return None;
    }
    let own = path.absolute();
    Some(
        own.strip_prefix(ancestor.absolute().as_str())
            .unwrap_or(own.as_str())
            .trim_start_matches('/')
            .to_string(),
    )
}

fn join(base: &std::path::Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}
