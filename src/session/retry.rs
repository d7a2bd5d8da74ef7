//! 连接失败重试（指数退避）

use crate::config::ConnectionConfig;
use crate::error::BackgroundError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试次数
    pub max_retries: u32,
    /// 初始退避（毫秒）
    pub base_delay_ms: u64,
    /// 退避上限（毫秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
        }
    }
}

impl From<&ConnectionConfig> for RetryConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_retries: config.retry,
            base_delay_ms: config.retry_delay_secs * 1000,
            ..Default::default()
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// 仅连接类错误可重试，取消与登录失败不重试
pub fn is_retryable(error: &BackgroundError) -> bool {
    matches!(error, BackgroundError::Connection { .. })
}
