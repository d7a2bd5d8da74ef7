//! 外部协作者接口（凭据、登录提示、主机密钥校验）
//!
//! 均为同步阻塞调用，返回 `Canceled` 表示用户放弃。

use crate::error::Result;
use crate::model::{Credentials, Host};

/// 主机密钥校验
pub trait HostKeyCallback: Send + Sync {
    fn verify(&self, host: &Host, fingerprint: Option<&str>) -> Result<bool>;
}

/// 登录提示
pub trait LoginCallback: Send + Sync {
    fn prompt(&self, host: &Host, reason: &str) -> Result<Credentials>;
}

/// 密码存储（钥匙串）
pub trait PasswordStore: Send + Sync {
    fn find(&self, host: &Host) -> Option<String>;
}

/// 接受任何主机密钥
pub struct AcceptingHostKeyCallback;

impl HostKeyCallback for AcceptingHostKeyCallback {
    fn verify(&self, _host: &Host, _fingerprint: Option<&str>) -> Result<bool> {
        Ok(true)
    }
}

/// 不保存任何密码
pub struct DisabledPasswordStore;

impl PasswordStore for DisabledPasswordStore {
    fn find(&self, _host: &Host) -> Option<String> {
        None
    }
}

/// 无交互环境下的登录提示，总是取消
pub struct DisabledLoginCallback;

impl LoginCallback for DisabledLoginCallback {
    fn prompt(&self, _host: &Host, _reason: &str) -> Result<Credentials> {
        Err(crate::error::BackgroundError::Canceled)
    }
}
