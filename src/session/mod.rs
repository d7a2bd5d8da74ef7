//! 会话：单个连接的生命周期
//!
//! 状态机 `Closed -> Opening -> Open -> Closing -> Closed`，协议握手与
//! 登录委托给 `SessionBackend`。

pub mod callback;
pub mod connection;
pub mod feature;
pub mod listener;
pub mod resolver;
pub mod retry;

pub use callback::{HostKeyCallback, LoginCallback, PasswordStore};
pub use connection::{ConnectionOutcome, ConnectionService};
pub use feature::{ByteStream, Capability, Feature, ListProgressListener};
pub use listener::{ConnectionEvent, ConnectionListener, ListenerSet, ProgressListener, TranscriptListener};

use crate::error::{BackgroundError, ConnectionErrorKind, Result};
use crate::model::{AttributedList, Credentials, Host, Path, PathAttributes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feature::{
    AttributesFinder, Copier, Deleter, DirectoryMaker, Finder, Lister, Mover, PermissionSetter,
    Reader, SymlinkMaker, TimestampSetter, Writer,
};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// 协议实现
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// 代理设置，不支持的协议忽略
    fn configure_proxy(&self, _proxy: Option<&str>) {}

    /// 协议握手
    async fn connect(&self, host: &Host, key: &dyn HostKeyCallback) -> Result<()>;

    async fn login(
        &self,
        host: &Host,
        credentials: &Credentials,
        cancel: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()>;

    async fn logout(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// 未支持的能力返回 `None`
    fn feature(&self, feature: Feature) -> Option<Capability>;
}

pub struct Session {
    host: Host,
    backend: Arc<dyn SessionBackend>,
    state: Mutex<SessionState>,
    connection_listeners: ListenerSet<dyn ConnectionListener>,
    progress_listeners: ListenerSet<dyn ProgressListener>,
    transcript_listeners: ListenerSet<dyn TranscriptListener>,
    last_accessed: Mutex<Option<DateTime<Utc>>>,
}

macro_rules! typed_feature {
    ($name:ident, $variant:ident, $trait:ident) => {
        pub fn $name(&self) -> Option<Arc<dyn $trait>> {
            match self.backend.feature(Feature::$variant) {
                Some(Capability::$variant(f)) => Some(f),
                _ => None,
            }
        }
    };
}

impl Session {
    pub fn new(host: Host, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            host,
            backend,
            state: Mutex::new(SessionState::Closed),
            connection_listeners: ListenerSet::default(),
            progress_listeners: ListenerSet::default(),
            transcript_listeners: ListenerSet::default(),
            last_accessed: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    pub fn connection_listeners(&self) -> &ListenerSet<dyn ConnectionListener> {
        &self.connection_listeners
    }

    pub fn progress_listeners(&self) -> &ListenerSet<dyn ProgressListener> {
        &self.progress_listeners
    }

    pub fn transcript_listeners(&self) -> &ListenerSet<dyn TranscriptListener> {
        &self.transcript_listeners
    }

    fn fire(&self, event: ConnectionEvent) {
        let host = &self.host;
        self.connection_listeners.notify(|l| l.on_event(host, event));
    }

    pub(crate) fn message(&self, message: &str) {
        self.progress_listeners.notify(|l| l.message(message));
    }

    pub(crate) fn transcript(&self, request: bool, message: &str) {
        self.transcript_listeners.notify(|l| l.log(request, message));
    }

    pub fn configure_proxy(&self, proxy: Option<&str>) {
        self.backend.configure_proxy(proxy);
    }

    /// 建立连接。失败时状态回到 `Closed`
    pub async fn open(&self, key: &dyn HostKeyCallback) -> Result<()> {
        self.set_state(SessionState::Opening);
        self.fire(ConnectionEvent::WillOpen);
        self.message(&format!("正在连接 {}", self.host.display_name()));
        if let Err(e) = self.backend.connect(&self.host, key).await {
            self.set_state(SessionState::Closed);
            return Err(e);
        }
        self.set_state(SessionState::Open);
        self.fire(ConnectionEvent::DidOpen);
        debug!("已连接: {}", self.host.display_name());
        Ok(())
    }

    /// 登录，仅在连接打开时可用
    ///
    /// 凭据顺序：书签中的密码、密码存储、登录提示。
    pub async fn login(
        &self,
        prompt: &dyn LoginCallback,
        keychain: &dyn PasswordStore,
        cancel: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(BackgroundError::connection(
                ConnectionErrorKind::Other,
                "会话未打开",
            ));
        }
        let credentials = self.credentials(prompt, keychain)?;
        if cancel() {
            return Err(BackgroundError::Canceled);
        }
        self.transcript(true, &format!("LOGIN {}", credentials.username));
        self.backend.login(&self.host, &credentials, cancel).await?;
        self.message(&format!("已登录 {}", self.host.display_name()));
        Ok(())
    }

    fn credentials(
        &self,
        prompt: &dyn LoginCallback,
        keychain: &dyn PasswordStore,
    ) -> Result<Credentials> {
        let credentials = &self.host.credentials;
        if !self.host.protocol.requires_password()
            || credentials.password.is_some()
            || credentials.is_anonymous()
        {
            return Ok(credentials.clone());
        }
        if let Some(password) = keychain.find(&self.host) {
            return Ok(Credentials::new(credentials.username.clone(), Some(password)));
        }
        prompt.prompt(&self.host, "需要登录凭据")
    }

    /// 正常关闭：先注销再断开，最终状态总为 `Closed`
    pub async fn close(&self) -> Result<()> {
        self.set_state(SessionState::Closing);
        self.fire(ConnectionEvent::WillClose);
        let logout = self.backend.logout().await;
        if let Err(e) = &logout {
            warn!("注销失败: {}", e);
        }
        let disconnect = self.backend.disconnect().await;
        self.set_state(SessionState::Closed);
        self.fire(ConnectionEvent::DidClose);
        logout.and(disconnect)
    }

    /// 强制中断：跳过注销直接断开，最终状态总为 `Closed`
    pub async fn interrupt(&self) -> Result<()> {
        self.set_state(SessionState::Closing);
        self.fire(ConnectionEvent::WillClose);
        let result = self.backend.disconnect().await;
        self.set_state(SessionState::Closed);
        self.fire(ConnectionEvent::DidClose);
        result
    }

    pub fn get_feature(&self, feature: Feature) -> Option<Capability> {
        self.backend.feature(feature)
    }

    typed_feature!(reader, Read, Reader);
    typed_feature!(writer, Write, Writer);
    typed_feature!(lister, List, Lister);
    typed_feature!(finder, Find, Finder);
    typed_feature!(attributes_finder, Attributes, AttributesFinder);
    typed_feature!(deleter, Delete, Deleter);
    typed_feature!(copier, Copy, Copier);
    typed_feature!(mover, Move, Mover);
    typed_feature!(directory_maker, Directory, DirectoryMaker);
    typed_feature!(symlink_maker, Symlink, SymlinkMaker);
    typed_feature!(timestamp_setter, Timestamp, TimestampSetter);
    typed_feature!(permission_setter, UnixPermission, PermissionSetter);

    pub async fn list(
        &self,
        directory: &Path,
        listener: &dyn ListProgressListener,
    ) -> Result<AttributedList> {
        let lister = self
            .lister()
            .ok_or_else(|| BackgroundError::Unsupported("list".into()))?;
        self.transcript(true, &format!("LIST {}", directory));
        lister.list(directory, listener).await
    }

    /// 读取属性，不存在返回 `None`
    pub async fn attributes(&self, file: &Path) -> Result<Option<PathAttributes>> {
        let finder = self
            .attributes_finder()
            .ok_or_else(|| BackgroundError::Unsupported("attributes".into()))?;
        match finder.find(file).await {
            Ok(attributes) => Ok(Some(attributes)),
            Err(BackgroundError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn touch(&self) {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn last_accessed(&self) -> Option<DateTime<Utc>> {
        *self
            .last_accessed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::callback::{AcceptingHostKeyCallback, DisabledPasswordStore};
    use crate::testing::{local_host, MemoryBackend, RecordingConnectionListener};

    struct StaticLogin;

    impl LoginCallback for StaticLogin {
        fn prompt(&self, _host: &Host, _reason: &str) -> Result<Credentials> {
            Ok(Credentials::new("user", Some("secret".into())))
        }
    }

    #[tokio::test]
    async fn test_open_fires_events_in_order() {
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        let listener = Arc::new(RecordingConnectionListener::default());
        session.connection_listeners().add(listener.clone());

        session.open(&AcceptingHostKeyCallback).await.unwrap();
        assert!(session.is_connected());
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        assert_eq!(
            listener.events(),
            vec![
                ConnectionEvent::WillOpen,
                ConnectionEvent::DidOpen,
                ConnectionEvent::WillClose,
                ConnectionEvent::DidClose
            ]
        );
    }

    #[tokio::test]
    async fn test_close_is_closed_even_when_logout_fails() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_logout();
        let session = Session::new(local_host(), backend);
        session.open(&AcceptingHostKeyCallback).await.unwrap();

        assert!(session.close().await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_login_requires_open_session() {
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        let result = session
            .login(&StaticLogin, &DisabledPasswordStore, &|| false)
            .await;
        assert!(result.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_unsupported_feature_is_none() {
        let backend = Arc::new(MemoryBackend::new());
        let session = Session::new(local_host(), backend);
        assert!(session.get_feature(Feature::Symlink).is_none());
        assert!(session.get_feature(Feature::List).is_some());
    }

    #[test]
    fn test_listener_removed_during_notify() {
        let session = Session::new(local_host(), Arc::new(MemoryBackend::new()));
        let listener: Arc<dyn ConnectionListener> =
            Arc::new(RecordingConnectionListener::default());
        session.connection_listeners().add(listener.clone());
        let set = session.connection_listeners();
        set.notify(|_| set.remove(&listener));
        assert!(set.is_empty());
    }
}
