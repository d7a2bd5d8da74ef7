//! 基于 opendal 的协议实现
//!
//! 每个协议只负责构建 `Operator`，列表、读写等能力统一由 `OperatorFeatures`
//! 提供，并按服务端声明的能力决定是否对外暴露。

pub mod features;
pub mod ftp;
pub mod local;
pub mod s3;
pub mod webdav;

pub use features::OperatorFeatures;

use crate::config::{ConnectionConfig, TransferConfig};
use crate::error::{BackgroundError, Result};
use crate::model::{Credentials, Host, Protocol};
use crate::session::{Capability, Feature, HostKeyCallback, Session, SessionBackend};
use async_trait::async_trait;
use opendal::layers::TimeoutLayer;
use opendal::Operator;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 加上超时层
pub(crate) fn finish<B: opendal::Builder>(builder: B, config: &ConnectionConfig) -> Result<Operator> {
    Ok(Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(config.timeout_secs))
                .with_io_timeout(Duration::from_secs(config.io_timeout_secs)),
        )
        .finish())
}

fn build(host: &Host, credentials: &Credentials, config: &ConnectionConfig) -> Result<Operator> {
    match host.protocol {
        Protocol::Local => local::operator(host, config),
        Protocol::S3 => s3::operator(host, credentials, config),
        Protocol::WebDav => webdav::operator(host, credentials, config),
        Protocol::Ftp => ftp::operator(host, credentials, config),
    }
}

pub struct OperatorBackend {
    config: ConnectionConfig,
    chunk_size: usize,
    /// 预先构建的 `Operator`（如内存服务），登录时不再按主机构建
    preset: Option<Operator>,
    operator: Mutex<Option<Operator>>,
}

impl OperatorBackend {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            config: config.connection.clone(),
            chunk_size: config.queue.chunk_size,
            preset: None,
            operator: Mutex::new(None),
        }
    }

    pub fn with_operator(operator: Operator, chunk_size: usize) -> Self {
        Self {
            config: ConnectionConfig::default(),
            chunk_size,
            preset: Some(operator),
            operator: Mutex::new(None),
        }
    }

    fn operator(&self) -> Option<Operator> {
        self.operator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_operator(&self, operator: Option<Operator>) {
        *self.operator.lock().unwrap_or_else(PoisonError::into_inner) = operator;
    }
}

#[async_trait]
impl SessionBackend for OperatorBackend {
    fn configure_proxy(&self, proxy: Option<&str>) {
        if let Some(proxy) = proxy {
            warn!("当前协议实现不支持代理，已忽略: {}", proxy);
        }
    }

    async fn connect(&self, host: &Host, _key: &dyn HostKeyCallback) -> Result<()> {
        // opendal 在首次请求时建立连接，这里只记录目标
        debug!("准备连接 {}", host.display_name());
        Ok(())
    }

    async fn login(
        &self,
        host: &Host,
        credentials: &Credentials,
        cancel: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<()> {
        let operator = match &self.preset {
            Some(operator) => operator.clone(),
            None => build(host, credentials, &self.config)?,
        };
        if cancel() {
            return Err(BackgroundError::Canceled);
        }
        match operator.check().await {
            Ok(()) => {}
            Err(e) if e.kind() == opendal::ErrorKind::PermissionDenied => {
                return Err(BackgroundError::LoginFailure(format!(
                    "{}: {}",
                    credentials.username, e
                )));
            }
            Err(e) => return Err(e.into()),
        }
        if cancel() {
            return Err(BackgroundError::Canceled);
        }
        info!("已登录 {} ({})", host.display_name(), operator.info().scheme());
        self.set_operator(Some(operator));
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_operator(None);
        Ok(())
    }

    fn feature(&self, feature: Feature) -> Option<Capability> {
        let operator = self.operator()?;
        let features = Arc::new(OperatorFeatures::new(operator, self.chunk_size));
        features.capability(feature)
    }
}

/// 按主机协议创建（未连接的）会话
pub fn create_session(host: &Host, config: &TransferConfig) -> Session {
    Session::new(host.clone(), Arc::new(OperatorBackend::new(config)))
}
