use crate::error::{BackgroundError, ConnectionErrorKind, Result};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 可取消的主机名解析
pub async fn resolve(
    hostname: &str,
    port: u16,
    cancel: &CancellationToken,
) -> Result<Vec<SocketAddr>> {
    let target = if hostname.contains(':') {
        format!("[{}]:{}", hostname, port)
    } else {
        format!("{}:{}", hostname, port)
    };
    let lookup = tokio::net::lookup_host(target.clone());
    let addresses = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("主机名解析已取消: {}", hostname);
            return Err(BackgroundError::Canceled);
        }
        result = lookup => result.map_err(|e| {
            BackgroundError::connection(ConnectionErrorKind::UnknownHost, format!("{}: {}", hostname, e))
        })?,
    };
    let addresses: Vec<SocketAddr> = addresses.collect();
    if addresses.is_empty() {
        return Err(BackgroundError::connection(
            ConnectionErrorKind::UnknownHost,
            hostname.to_string(),
        ));
    }
    debug!("已解析 {} -> {:?}", hostname, addresses);
    Ok(addresses)
}
