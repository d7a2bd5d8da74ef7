//! 传输引擎错误类型

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 连接错误分类（由底层 IO 错误映射而来）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    Timeout,
    Refused,
    UnknownHost,
    Tls,
    Other,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionErrorKind::Timeout => write!(f, "timeout"),
            ConnectionErrorKind::Refused => write!(f, "refused"),
            ConnectionErrorKind::UnknownHost => write!(f, "unknown_host"),
            ConnectionErrorKind::Tls => write!(f, "tls"),
            ConnectionErrorKind::Other => write!(f, "other"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackgroundError {
    /// 用户或系统取消，永不重试
    #[error("操作已取消")]
    Canceled,

    #[error("连接失败 ({kind}): {message}")]
    Connection {
        kind: ConnectionErrorKind,
        message: String,
    },

    /// 凭据错误，与普通连接错误区分以便重新提示登录
    #[error("登录失败: {0}")]
    LoginFailure(String),

    #[error("文件不存在: {0}")]
    NotFound(String),

    #[error("访问被拒绝: {0}")]
    AccessDenied(String),

    #[error("不支持的操作: {0}")]
    Unsupported(String),

    #[error("传输失败: {0}")]
    Transfer(String),

    #[error("IO 错误: {0}")]
    Io(String),
}

pub type Result<T, E = BackgroundError> = std::result::Result<T, E>;

impl BackgroundError {
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        BackgroundError::Connection {
            kind,
            message: message.into(),
        }
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, BackgroundError::Canceled)
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, BackgroundError::Connection { .. })
    }

    pub fn is_login_failure(&self) -> bool {
        matches!(self, BackgroundError::LoginFailure(_))
    }
}

impl From<std::io::Error> for BackgroundError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => BackgroundError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => BackgroundError::AccessDenied(err.to_string()),
            ErrorKind::TimedOut => BackgroundError::connection(ConnectionErrorKind::Timeout, err.to_string()),
            ErrorKind::ConnectionRefused => {
                BackgroundError::connection(ConnectionErrorKind::Refused, err.to_string())
            }
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::NotConnected => {
                BackgroundError::connection(ConnectionErrorKind::Other, err.to_string())
            }
            ErrorKind::Interrupted => BackgroundError::Canceled,
            _ => BackgroundError::Io(err.to_string()),
        }
    }
}

impl From<opendal::Error> for BackgroundError {
    fn from(err: opendal::Error) -> Self {
        use opendal::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => BackgroundError::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => BackgroundError::AccessDenied(err.to_string()),
            ErrorKind::Unsupported => BackgroundError::Unsupported(err.to_string()),
            ErrorKind::ConfigInvalid => {
                BackgroundError::connection(ConnectionErrorKind::Other, err.to_string())
            }
            _ if err.is_temporary() => {
                BackgroundError::connection(ConnectionErrorKind::Timeout, err.to_string())
            }
            _ => BackgroundError::Transfer(err.to_string()),
        }
    }
}
