use super::finish;
use crate::config::ConnectionConfig;
use crate::error::{BackgroundError, ConnectionErrorKind, Result};
use crate::model::{Credentials, Host};
use opendal::Operator;

const DEFAULT_REGION: &str = "us-east-1";

pub(super) fn operator(
    host: &Host,
    credentials: &Credentials,
    config: &ConnectionConfig,
) -> Result<Operator> {
    use opendal::services::S3;

    let bucket = host.bucket.as_deref().ok_or_else(|| {
        BackgroundError::connection(ConnectionErrorKind::Other, "S3 连接缺少 bucket")
    })?;
    let mut builder = S3::default()
        .bucket(bucket)
        .region(host.region.as_deref().unwrap_or(DEFAULT_REGION))
        .access_key_id(&credentials.username);

    if let Some(secret) = &credentials.password {
        builder = builder.secret_access_key(secret);
    }
    if !host.hostname.is_empty() {
        builder = builder.endpoint(&endpoint(host));
    }
    if let Some(prefix) = &host.defaultPath {
        builder = builder.root(prefix);
    }

    finish(builder, config)
}

fn endpoint(host: &Host) -> String {
    if host.hostname.contains("://") {
        return host.hostname.clone();
    }
    match host.port {
        443 => format!("https://{}", host.hostname),
        port => format!("https://{}:{}", host.hostname, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Protocol;

    #[test]
    fn test_endpoint_keeps_custom_port() {
        let host = Host::new(Protocol::S3, "minio.local").with_port(9000);
        assert_eq!(endpoint(&host), "https://minio.local:9000");
        let host = Host::new(Protocol::S3, "http://127.0.0.1:9000");
        assert_eq!(endpoint(&host), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_bucket_is_required() {
        let host = Host::new(Protocol::S3, "s3.amazonaws.com");
        let result = operator(&host, &Credentials::default(), &ConnectionConfig::default());
        assert!(result.unwrap_err().is_connection());
    }
}
