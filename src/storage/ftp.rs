use super::finish;
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::model::{Credentials, Host};
use opendal::Operator;

pub(super) fn operator(
    host: &Host,
    credentials: &Credentials,
    config: &ConnectionConfig,
) -> Result<Operator> {
    use opendal::services::Ftp;

    let (hostname, port) = host.authority();
    let mut builder = Ftp::default().endpoint(&format!("ftp://{}:{}", hostname, port));
    // 匿名登录不传用户名，由服务端按 anonymous 处理
    if !credentials.is_anonymous() {
        builder = builder.user(&credentials.username);
        if let Some(password) = &credentials.password {
            builder = builder.password(password);
        }
    }
    if let Some(root) = &host.defaultPath {
        builder = builder.root(root);
    }

    finish(builder, config)
}
