//! 连接服务：解析、打开、登录与取消

use super::callback::{HostKeyCallback, LoginCallback, PasswordStore};
use super::resolver;
use super::retry::{is_retryable, RetryConfig};
use super::{Session, SessionState};
use crate::config::ConnectionConfig;
use crate::core::cache::ListCache;
use crate::error::{BackgroundError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// 已连接，直接复用
    Reused,
    /// 新建连接
    Connected,
}

pub struct ConnectionService {
    config: ConnectionConfig,
    key: Arc<dyn HostKeyCallback>,
    prompt: Arc<dyn LoginCallback>,
    keychain: Arc<dyn PasswordStore>,
    canceled: Arc<AtomicBool>,
    resolver: Mutex<CancellationToken>,
}

impl ConnectionService {
    pub fn new(
        config: ConnectionConfig,
        key: Arc<dyn HostKeyCallback>,
        prompt: Arc<dyn LoginCallback>,
        keychain: Arc<dyn PasswordStore>,
    ) -> Self {
        Self {
            config,
            key,
            prompt,
            keychain,
            canceled: Arc::new(AtomicBool::new(false)),
            resolver: Mutex::new(CancellationToken::new()),
        }
    }

    /// 确保会话可用
    pub async fn check(&self, session: &Session, cache: &ListCache) -> Result<ConnectionOutcome> {
        if session.is_connected() {
            return Ok(ConnectionOutcome::Reused);
        }
        if session.host().hostname.trim().is_empty() {
            warn!("主机名为空，放弃连接");
            return Err(BackgroundError::Canceled);
        }
        self.connect(session, cache).await?;
        Ok(ConnectionOutcome::Connected)
    }

    pub async fn connect(&self, session: &Session, cache: &ListCache) -> Result<()> {
        // 同一会话重新连接时远程内容可能已变化；池中新建的会话与其他会话共用缓存，不清空
        let reconnecting = session.last_accessed().is_some();
        if session.state() != SessionState::Closed {
            if let Err(e) = session.interrupt().await {
                warn!("中断旧连接失败: {}", e);
            }
        }

        let retry = RetryConfig::from(&self.config);
        let mut attempt = 0;
        loop {
            match self.open(session).await {
                Ok(()) => break,
                Err(e) if is_retryable(&e) && attempt < retry.max_retries && !self.is_canceled() => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        "连接失败，{}ms 后重试 ({}/{}): {}",
                        delay.as_millis(),
                        attempt + 1,
                        retry.max_retries,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        session.touch();
        if reconnecting {
            debug!("重新连接，清空目录缓存: {}", session.host().display_name());
            cache.clear();
        }

        let canceled = self.canceled.clone();
        let cancel = move || canceled.load(Ordering::SeqCst);
        if let Err(e) = session
            .login(self.prompt.as_ref(), self.keychain.as_ref(), &cancel)
            .await
        {
            warn!("登录失败: {}", e);
            if let Err(e) = session.interrupt().await {
                debug!("中断连接失败: {}", e);
            }
            return Err(e);
        }
        info!("连接已建立: {}", session.host().display_name());
        Ok(())
    }

    async fn open(&self, session: &Session) -> Result<()> {
        if self.is_canceled() {
            return Err(BackgroundError::Canceled);
        }
        session.configure_proxy(self.config.proxy.as_deref());
        let host = session.host();
        if host.protocol.is_remote() {
            let token = self.arm_resolver()?;
            let (hostname, port) = host.authority();
            resolver::resolve(&hostname, port, &token).await?;
        }
        session.open(self.key.as_ref()).await
    }

    /// 登记新的解析令牌；与 `cancel` 在同一把锁下检查取消标志
    fn arm_resolver(&self) -> Result<CancellationToken> {
        let mut resolver = self.resolver.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_canceled() {
            return Err(BackgroundError::Canceled);
        }
        let token = CancellationToken::new();
        *resolver = token.clone();
        Ok(token)
    }

    /// 取消进行中的连接与解析
    pub fn cancel(&self) {
        let resolver = self.resolver.lock().unwrap_or_else(PoisonError::into_inner);
        self.canceled.store(true, Ordering::SeqCst);
        resolver.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// 清除取消标志以便重新连接
    pub fn reset(&self) {
        self.canceled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributedList, EntryType, Host, Path, Protocol};
    use crate::session::callback::{AcceptingHostKeyCallback, DisabledLoginCallback, DisabledPasswordStore};
    use crate::testing::{local_host, MemoryBackend};

    fn service() -> ConnectionService {
        ConnectionService::new(
            ConnectionConfig::default(),
            Arc::new(AcceptingHostKeyCallback),
            Arc::new(DisabledLoginCallback),
            Arc::new(DisabledPasswordStore),
        )
    }

    #[tokio::test]
    async fn test_check_reuses_open_session() {
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        let cache = ListCache::new(16);
        let service = service();

        assert_eq!(
            service.check(&session, &cache).await.unwrap(),
            ConnectionOutcome::Connected
        );
        assert!(session.last_accessed().is_some());
        assert_eq!(
            service.check(&session, &cache).await.unwrap(),
            ConnectionOutcome::Reused
        );
    }

    #[tokio::test]
    async fn test_blank_hostname_is_canceled() {
        let session = Session::new(
            Host::new(Protocol::Ftp, "  "),
            Arc::new(MemoryBackend::new()),
        );
        let result = service().check(&session, &ListCache::new(16)).await;
        assert!(result.unwrap_err().is_cancel());
    }

    #[tokio::test]
    async fn test_login_failure_interrupts_session() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_login();
        let session = Session::new(local_host(), backend);

        let result = service().check(&session, &ListCache::new(16)).await;
        assert!(result.unwrap_err().is_login_failure());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_canceled_service_does_not_open() {
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        let service = service();
        service.cancel();

        let result = service.check(&session, &ListCache::new(16)).await;
        assert!(result.unwrap_err().is_cancel());
        assert!(!session.is_connected());

        service.reset();
        assert!(service.check(&session, &ListCache::new(16)).await.is_ok());
    }

    #[tokio::test]
    async fn test_url_hostname_connects() {
        let session = Session::new(
            Host::new(Protocol::WebDav, "http://127.0.0.1:8080/dav"),
            Arc::new(MemoryBackend::new()),
        );
        let outcome = service().check(&session, &ListCache::new(16)).await.unwrap();
        assert_eq!(outcome, ConnectionOutcome::Connected);
        assert!(session.is_connected());
    }

    #[test]
    fn test_cancel_reaches_armed_resolver() {
        let service = service();
        let token = service.arm_resolver().unwrap();
        service.cancel();
        assert!(token.is_cancelled());
        assert!(service.arm_resolver().unwrap_err().is_cancel());

        service.reset();
        assert!(!service.arm_resolver().unwrap().is_cancelled());
    }

    fn cached(cache: &ListCache) {
        let directory = Path::new("/d", EntryType::DIRECTORY);
        cache.put(&directory, AttributedList::default());
    }

    #[tokio::test]
    async fn test_first_connection_keeps_shared_cache() {
        let cache = ListCache::new(16);
        cached(&cache);
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        service().check(&session, &cache).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_clears_cache() {
        let cache = ListCache::new(16);
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        let service = service();
        service.check(&session, &cache).await.unwrap();
        cached(&cache);

        session.interrupt().await.unwrap();
        service.check(&session, &cache).await.unwrap();
        assert!(cache.is_empty());
    }
}
