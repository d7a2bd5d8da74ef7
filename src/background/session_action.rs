//! 需要连接的后台任务：检查连接、执行工作，连接失败时重试

use super::action::BackgroundAction;
use crate::core::cache::ListCache;
use crate::core::progress::TransferOutcome;
use crate::core::worker::TransferWorker;
use crate::error::{BackgroundError, Result};
use crate::session::retry::{is_retryable, RetryConfig};
use crate::session::{ConnectionService, Session};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// 在已连接会话上执行的工作
#[async_trait]
pub trait Worker: Send + Sync {
    type Output: Send;

    async fn run(&self, session: &Arc<Session>) -> Result<Self::Output>;

    fn cancel(&self) {}

    fn name(&self) -> String;
}

#[async_trait]
impl Worker for Arc<TransferWorker> {
    type Output = TransferOutcome;

    async fn run(&self, session: &Arc<Session>) -> Result<TransferOutcome> {
        TransferWorker::run(self, session).await
    }

    fn cancel(&self) {
        TransferWorker::cancel(self);
    }

    fn name(&self) -> String {
        self.transfer().name()
    }
}

pub struct SessionBackgroundAction<W: Worker> {
    id: String,
    session: Arc<Session>,
    cache: Arc<ListCache>,
    connection: Arc<ConnectionService>,
    worker: W,
    retry: RetryConfig,
    canceled: AtomicBool,
    result: Mutex<Option<W::Output>>,
}

impl<W: Worker> SessionBackgroundAction<W> {
    pub fn new(
        session: Arc<Session>,
        cache: Arc<ListCache>,
        connection: Arc<ConnectionService>,
        worker: W,
        retry: RetryConfig,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session,
            cache,
            connection,
            worker,
            retry,
            canceled: AtomicBool::new(false),
            result: Mutex::new(None),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// 取出结果，取消或失败时为 `None`
    pub fn take_result(&self) -> Option<W::Output> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn interrupt(&self) {
        if let Err(e) = self.session.interrupt().await {
            debug!("中断连接失败: {}", e);
        }
    }
}

#[async_trait]
impl<W: Worker> BackgroundAction for SessionBackgroundAction<W> {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> String {
        self.worker.name()
    }

    /// 同一会话上的任务互斥
    fn lock(&self) -> Option<String> {
        Some(self.session.host().uuid.clone())
    }

    async fn run(&self) -> Result<()> {
        let mut attempt = 0;
        loop {
            if self.is_canceled() {
                self.interrupt().await;
                return Err(BackgroundError::Canceled);
            }
            let outcome = match self.connection.check(&self.session, &self.cache).await {
                Ok(_) => self.worker.run(&self.session).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(output) => {
                    *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
                    return Ok(());
                }
                Err(e) if e.is_cancel() || self.is_canceled() => {
                    info!("取消后中断连接: {}", self.session.host().display_name());
                    self.interrupt().await;
                    return Err(BackgroundError::Canceled);
                }
                Err(e) if is_retryable(&e) && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!("连接中断，{}ms 后重试 {}: {}", delay.as_millis(), self.name(), e);
                    attempt += 1;
                    self.interrupt().await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.connection.cancel();
        self.worker.cancel();
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::controller::Controller;
    use crate::background::main_context::InlineContext;
    use crate::config::ConnectionConfig;
    use crate::error::ConnectionErrorKind;
    use crate::session::callback::{AcceptingHostKeyCallback, DisabledLoginCallback, DisabledPasswordStore};
    use crate::testing::{local_host, MemoryBackend};
    use std::sync::atomic::AtomicUsize;

    /// 前几次以连接错误失败
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Worker for Flaky {
        type Output = usize;

        async fn run(&self, session: &Arc<Session>) -> Result<usize> {
            assert!(session.is_connected());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(BackgroundError::connection(ConnectionErrorKind::Timeout, "reset"));
            }
            Ok(call)
        }

        fn name(&self) -> String {
            "flaky".into()
        }
    }

    fn action(failures: usize) -> SessionBackgroundAction<Flaky> {
        let session = Arc::new(Session::new(local_host(), Arc::new(MemoryBackend::new())));
        let connection = Arc::new(ConnectionService::new(
            ConnectionConfig::default(),
            Arc::new(AcceptingHostKeyCallback),
            Arc::new(DisabledLoginCallback),
            Arc::new(DisabledPasswordStore),
        ));
        let retry = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };
        SessionBackgroundAction::new(
            session,
            Arc::new(ListCache::new(8)),
            connection,
            Flaky {
                failures,
                calls: AtomicUsize::new(0),
            },
            retry,
        )
    }

    #[tokio::test]
    async fn test_connection_failures_are_retried() {
        let action = action(2);
        action.run().await.unwrap();
        assert_eq!(action.take_result(), Some(2));
        assert!(action.session().is_connected());
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let action = action(5);
        assert!(action.run().await.unwrap_err().is_connection());
        assert_eq!(action.take_result(), None);
    }

    #[tokio::test]
    async fn test_canceled_action_interrupts_session() {
        let action = Arc::new(action(0));
        action.session().open(&AcceptingHostKeyCallback).await.unwrap();
        action.cancel();

        assert!(action.run().await.unwrap_err().is_cancel());
        assert!(!action.session().is_connected());
    }

    #[tokio::test]
    async fn test_scheduled_through_controller() {
        let controller = Controller::new(Arc::new(InlineContext));
        let action = Arc::new(action(1));
        controller.schedule(action.clone()).unwrap().await.unwrap();
        assert_eq!(action.take_result(), Some(1));
    }
}
