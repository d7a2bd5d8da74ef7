//! 目录列表缓存
//!
//! 用于在准备和传输阶段之间复用远程目录列表，避免重复扫描。
//! 同一目录的并发加载只会触发一次远程列表请求。

use crate::config::CacheConfig;
use crate::error::Result;
use crate::model::{AttributedList, Path, PathReference};
use crate::session::{ListProgressListener, Session};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

struct CacheEntry {
    list: AttributedList,
    cached_at: Instant,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathReference, CacheEntry>,
    /// 已确认不存在的路径
    hidden: HashSet<PathReference>,
    tick: u64,
}

pub struct ListCache {
    capacity: usize,
    /// 缓存有效期，`None` 表示永不过期
    ttl: Option<Duration>,
    state: Mutex<CacheState>,
    loading: Mutex<HashMap<PathReference, Arc<tokio::sync::Mutex<()>>>>,
}

impl ListCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: None,
            state: Mutex::new(CacheState::default()),
            loading: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity).with_ttl(config.ttl_secs)
    }

    /// 设置缓存有效期（0 表示永不过期）
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl = (seconds > 0).then(|| Duration::from_secs(seconds));
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, directory: &Path) -> Option<AttributedList> {
        let reference = directory.reference();
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;
        let expired = match state.entries.get_mut(&reference) {
            None => return None,
            Some(entry) => {
                if self.ttl.is_some_and(|ttl| entry.cached_at.elapsed() > ttl) {
                    true
                } else {
                    entry.last_used = tick;
                    return Some(entry.list.clone());
                }
            }
        };
        if expired {
            debug!("缓存已过期: {}", directory);
            state.entries.remove(&reference);
        }
        None
    }

    pub fn contains(&self, directory: &Path) -> bool {
        self.get(directory).is_some()
    }

    /// 缓存目录列表，被截断的列表不缓存
    pub fn put(&self, directory: &Path, list: AttributedList) {
        if list.is_truncated() {
            debug!("列表不完整，不缓存: {}", directory);
            return;
        }
        let mut state = self.lock();
        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            directory.reference(),
            CacheEntry {
                list,
                cached_at: Instant::now(),
                last_used: tick,
            },
        );
        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(reference, _)| reference.clone());
            match oldest {
                Some(reference) => {
                    state.entries.remove(&reference);
                }
                None => break,
            }
        }
    }

    /// 移除目录列表及其下记录的不存在路径
    pub fn invalidate(&self, directory: &Path) {
        let reference = directory.reference();
        let prefix = format!("{}/", directory.absolute().trim_end_matches('/'));
        let mut state = self.lock();
        state.entries.remove(&reference);
        state.hidden.retain(|hidden| !hidden.path().starts_with(&prefix));
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.hidden.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_hidden(&self, file: &Path) -> bool {
        self.lock().hidden.contains(&file.reference())
    }

    fn hide(&self, file: &Path) {
        self.lock().hidden.insert(file.reference());
    }

    /// 在已缓存的父目录列表中查找
    pub fn lookup(&self, file: &Path) -> Option<Path> {
        self.get(file.parent())?.find_by_name(file.name()).cloned()
    }

    fn gate(&self, directory: &Path) -> Arc<tokio::sync::Mutex<()>> {
        self.loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(directory.reference())
            .or_default()
            .clone()
    }

    /// 列出目录，已缓存时直接返回
    pub async fn list(
        &self,
        session: &Session,
        directory: &Path,
        listener: &dyn ListProgressListener,
    ) -> Result<AttributedList> {
        if let Some(list) = self.get(directory) {
            return Ok(list);
        }
        let gate = self.gate(directory);
        let _guard = gate.lock().await;
        if let Some(list) = self.get(directory) {
            return Ok(list);
        }
        let result = session.list(directory, listener).await;
        // 先缓存再撤掉加载闸门，之后到达的调用者必然命中缓存
        if let Ok(list) = &result {
            self.put(directory, list.clone());
        }
        self.loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&directory.reference());
        result
    }

    /// 判断路径是否存在，不存在的结果会被记录
    pub async fn find(&self, session: &Session, file: &Path) -> Result<bool> {
        if file.is_root() {
            return Ok(true);
        }
        if self.is_hidden(file) {
            return Ok(false);
        }
        let found = if let Some(list) = self.get(file.parent()) {
            list.contains_name(file.name())
        } else if let Some(finder) = session.finder() {
            finder.find(file).await?
        } else {
            let listener = crate::session::feature::DisabledListProgressListener;
            self.list(session, file.parent(), &listener)
                .await?
                .contains_name(file.name())
        };
        if !found {
            self.hide(file);
        }
        Ok(found)
    }
}
