use super::finish;
use crate::config::ConnectionConfig;
use crate::error::Result;
use crate::model::Host;
use opendal::Operator;

/// 以书签的默认路径为根目录
pub(super) fn operator(host: &Host, config: &ConnectionConfig) -> Result<Operator> {
    use opendal::services::Fs;

    let root = host.defaultPath.as_deref().unwrap_or("/");
    finish(Fs::default().root(root), config)
}
