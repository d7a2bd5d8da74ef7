//! 传输配置
//!
//! 启动时从 `config.json` 读取一次，之后显式传给会话、传输与工作器。
//! 各段独立解析，缺失或损坏的段使用默认值。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// 默认跳过的文件名（编辑器备份、系统元数据、版本控制目录）
pub const DEFAULT_SKIP_PATTERN: &str =
    r"^(.*~\..*|\.DS_Store|\.svn|CVS|\.git|\.hg|Thumbs\.db|desktop\.ini)$";

/// 单个方向（下载、上传、复制）的设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectionConfig {
    /// 目标已存在时的默认动作
    #[serde(default = "default_action")]
    pub action: String,
    /// 重新加载传输时使用的动作
    #[serde(default = "default_reload_action")]
    pub reload_action: String,
    /// 按文件名跳过的正则，空表示不跳过
    #[serde(default = "default_skip_pattern")]
    pub skip_pattern: String,
    /// 完成后同步权限
    #[serde(default)]
    pub permissions: bool,
    /// 完成后同步修改时间
    #[serde(default = "default_true")]
    pub timestamp: bool,
}

fn default_action() -> String {
    "callback".to_string()
}

fn default_reload_action() -> String {
    "overwrite".to_string()
}

fn default_skip_pattern() -> String {
    DEFAULT_SKIP_PATTERN.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            action: default_action(),
            reload_action: default_reload_action(),
            skip_pattern: default_skip_pattern(),
            permissions: false,
            timestamp: true,
        }
    }
}

/// 连接设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// 非 IO 操作超时（秒）- stat, delete 等
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// IO 操作超时（秒）- read, write 等
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// 连接失败重试次数
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_io_timeout_secs() -> u64 {
    300
}

fn default_retry() -> u32 {
    1
}

fn default_retry_delay_secs() -> u64 {
    2
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            retry: default_retry(),
            retry_delay_secs: default_retry_delay_secs(),
            proxy: None,
        }
    }
}

/// 队列设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// 单个传输可借用的连接数，1 表示串行
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// 读取分块大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// 带宽限制（字节/秒），0 表示不限
    #[serde(default)]
    pub bandwidth: u64,
    /// 进度上报间隔（毫秒）
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_connections() -> usize {
    1
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_progress_interval_ms() -> u64 {
    500
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            chunk_size: default_chunk_size(),
            bandwidth: 0,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

/// 目录列表缓存设置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// 最多缓存的目录数
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// 缓存有效期（秒），0 表示永不过期
    #[serde(default)]
    pub ttl_secs: u64,
}

fn default_capacity() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            ttl_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    pub download: DirectionConfig,
    pub upload: DirectionConfig,
    pub copy: DirectionConfig,
    pub connection: ConnectionConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
}

fn load_section<T: DeserializeOwned + Default>(config: &serde_json::Value, key: &str) -> T {
    config
        .get(key)
        .and_then(|section| serde_json::from_value::<T>(section.clone()).ok())
        .unwrap_or_default()
}

impl TransferConfig {
    /// 从配置文件加载
    pub fn load(config_dir: &Path) -> Self {
        let config = fs::read_to_string(config_dir.join("config.json"))
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .unwrap_or_else(|| serde_json::json!({}));

        Self {
            download: load_section(&config, "download"),
            upload: load_section(&config, "upload"),
            copy: load_section(&config, "copy"),
            connection: load_section(&config, "connection"),
            queue: load_section(&config, "queue"),
            cache: load_section(&config, "cache"),
        }
    }

    /// 保存配置，保留文件中的其他段（如 `log`）
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        let config_file = config_dir.join("config.json");

        // 读取现有配置
        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };
        if !config.is_object() {
            config = serde_json::json!({});
        }

        let sections = serde_json::to_value(self).map_err(io::Error::other)?;
        if let serde_json::Value::Object(sections) = sections {
            for (key, value) in sections {
                config[key.as_str()] = value;
            }
        }

        let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
        fs::write(&config_file, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = TransferConfig::load(dir.path());
        assert_eq!(config, TransferConfig::default());
        assert_eq!(config.queue.progress_interval_ms, 500);
    }

    #[test]
    fn test_corrupt_section_falls_back() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"queue": {"connections": "many"}, "download": {"action": "resume"}}"#,
        )
        .unwrap();
        let config = TransferConfig::load(dir.path());
        assert_eq!(config.queue, QueueConfig::default());
        assert_eq!(config.download.action, "resume");
        assert!(config.download.timestamp);
    }

    #[test]
    fn test_save_keeps_other_sections() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.json"), r#"{"log": {"level": "debug"}}"#).unwrap();

        let mut config = TransferConfig::default();
        config.upload.action = "skip".to_string();
        config.save(dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join("config.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["log"]["level"], "debug");
        assert_eq!(TransferConfig::load(dir.path()).upload.action, "skip");
    }
}
