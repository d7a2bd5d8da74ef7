//! 会话池：并发传输时为每个工作单元借出一个已连接的会话

use super::cache::ListCache;
use crate::config::QueueConfig;
use crate::error::{BackgroundError, Result};
use crate::model::Host;
use crate::session::{ConnectionService, Session};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// 新建会话（未连接）
pub trait SessionFactory: Send + Sync {
    fn create(&self, host: &Host) -> Result<Session>;
}

impl<F> SessionFactory for F
where
    F: Fn(&Host) -> Result<Session> + Send + Sync,
{
    fn create(&self, host: &Host) -> Result<Session> {
        self(host)
    }
}

pub struct SessionPool {
    host: Host,
    factory: Arc<dyn SessionFactory>,
    connection: Arc<ConnectionService>,
    cache: Arc<ListCache>,
    idle: Mutex<Vec<Arc<Session>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

/// 借出的会话，释放时归还
pub struct PooledSession {
    session: Arc<Session>,
    pool: Arc<SessionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        self.pool.release(self.session.clone());
    }
}

impl SessionPool {
    pub fn new(
        host: Host,
        factory: Arc<dyn SessionFactory>,
        connection: Arc<ConnectionService>,
        cache: Arc<ListCache>,
        size: usize,
    ) -> Self {
        let size = size.max(1);
        Self {
            host,
            factory,
            connection,
            cache,
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// 连接数取自队列设置
    pub fn from_config(
        host: Host,
        factory: Arc<dyn SessionFactory>,
        connection: Arc<ConnectionService>,
        cache: Arc<ListCache>,
        config: &QueueConfig,
    ) -> Self {
        Self::new(host, factory, connection, cache, config.connections)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 借出会话，池满时等待
    pub async fn borrow(self: &Arc<Self>) -> Result<PooledSession> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BackgroundError::Canceled)?;
        let cached = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let session = match cached {
            Some(session) => session,
            None => {
                debug!("新建连接: {}", self.host.display_name());
                Arc::new(self.factory.create(&self.host)?)
            }
        };
        self.connection.check(&session, &self.cache).await?;
        Ok(PooledSession {
            session,
            pool: self.clone(),
            _permit: permit,
        })
    }

    fn release(&self, session: Arc<Session>) {
        if !session.is_connected() {
            debug!("丢弃已断开的连接");
            return;
        }
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session);
    }

    /// 关闭所有空闲连接
    pub async fn shutdown(&self) {
        self.permits.close();
        let sessions: Vec<_> = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for session in sessions {
            if let Err(e) = session.close().await {
                warn!("关闭连接失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::model::{EntryType, Path};
    use crate::session::feature::DisabledListProgressListener;
    use crate::session::callback::{AcceptingHostKeyCallback, DisabledLoginCallback, DisabledPasswordStore};
    use crate::testing::{local_host, MemoryBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pool(size: usize, created: Arc<AtomicUsize>) -> Arc<SessionPool> {
        shared_pool(size, created, Arc::new(MemoryBackend::new()), Arc::new(ListCache::new(8)))
    }

    fn shared_pool(
        size: usize,
        created: Arc<AtomicUsize>,
        backend: Arc<MemoryBackend>,
        cache: Arc<ListCache>,
    ) -> Arc<SessionPool> {
        let factory = move |host: &Host| -> Result<Session> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new(host.clone(), backend.clone()))
        };
        let connection = Arc::new(ConnectionService::new(
            ConnectionConfig::default(),
            Arc::new(AcceptingHostKeyCallback),
            Arc::new(DisabledLoginCallback),
            Arc::new(DisabledPasswordStore),
        ));
        Arc::new(SessionPool::new(
            local_host(),
            Arc::new(factory),
            connection,
            cache,
            size,
        ))
    }

    #[tokio::test]
    async fn test_sessions_are_reused() {
        let created = Arc::new(AtomicUsize::new(0));
        let pool = pool(2, created.clone());

        let first = pool.borrow().await.unwrap();
        assert!(first.session().is_connected());
        drop(first);
        assert_eq!(pool.idle(), 1);

        let _again = pool.borrow().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_borrow_waits_when_exhausted() {
        let pool = pool(1, Arc::new(AtomicUsize::new(0)));
        let held = pool.borrow().await.unwrap();

        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), pool.borrow()).await;
        assert!(waiting.is_err());

        drop(held);
        assert!(pool.borrow().await.is_ok());
    }

    #[tokio::test]
    async fn test_new_pooled_sessions_keep_listings() {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_file("/d/a", b"a");
        let cache = Arc::new(ListCache::new(8));
        let main = Session::new(local_host(), backend.clone());
        main.open(&AcceptingHostKeyCallback).await.unwrap();

        let directory = Path::new("/d", EntryType::DIRECTORY);
        let missing = directory.child("none", EntryType::FILE);
        cache.list(&main, &directory, &DisabledListProgressListener).await.unwrap();
        assert!(!cache.find(&main, &missing).await.unwrap());

        let created = Arc::new(AtomicUsize::new(0));
        let pool = shared_pool(2, created.clone(), backend.clone(), cache.clone());
        let first = pool.borrow().await.unwrap();
        let second = pool.borrow().await.unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);

        cache.list(first.session(), &directory, &DisabledListProgressListener).await.unwrap();
        assert_eq!(backend.list_count(&directory), 1);
        assert!(cache.is_hidden(&missing));
        drop((first, second));
    }
}
