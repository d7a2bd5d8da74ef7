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
    use opendal::services::Webdav;

    let mut builder = Webdav::default().endpoint(&endpoint(host));
    if !credentials.is_anonymous() {
        builder = builder.username(&credentials.username);
    }
    if let Some(password) = &credentials.password {
        builder = builder.password(password);
    }
    if let Some(root) = &host.defaultPath {
        builder = builder.root(root);
    }

    finish(builder, config)
}

fn endpoint(host: &Host) -> String {
    if host.hostname.contains("://") {
        return host.hostname.trim_end_matches('/').to_string();
    }
    let scheme = if host.port == 80 { "http" } else { "https" };
    format!("{}://{}:{}", scheme, host.hostname, host.port)
}
