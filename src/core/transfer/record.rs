//! 传输队列持久化（JSON）

use super::{Transfer, TransferItem, TransferKind, TransferType};
use crate::config::TransferConfig;
use crate::core::cache::ListCache;
use crate::error::{BackgroundError, Result};
use crate::model::{Host, Path};
use crate::session::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::sync::Arc;
use tracing::warn;

const QUEUE_FILE: &str = "queue.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: TransferType,
    pub host: Host,
    pub items: Vec<TransferItem>,
    /// 复制传输的目标根目录，与 `items` 一一对应
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Path>,
    pub size: Option<u64>,
    pub transferred: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bandwidth: u64,
}

impl TransferRecord {
    pub(super) fn from_transfer(transfer: &Transfer) -> Self {
        let destinations = match transfer.kind() {
            TransferKind::Copy(copy) => copy.mapping.iter().map(|(_, d)| d.clone()).collect(),
            _ => Vec::new(),
        };
        Self {
            uuid: transfer.uuid().to_string(),
            kind: transfer.transfer_type(),
            host: transfer.host().clone(),
            items: transfer.roots().to_vec(),
            destinations,
            size: transfer.size(),
            transferred: transfer.transferred(),
            timestamp: transfer.timestamp(),
            bandwidth: transfer.bandwidth().limit(),
        }
    }

    /// 重建传输，复制传输需要提供目标会话
    pub fn restore(
        self,
        config: &TransferConfig,
        destination: Option<(Arc<Session>, Arc<ListCache>)>,
    ) -> Result<Transfer> {
        let transfer = match self.kind {
            TransferType::Download => Transfer::download(self.host, self.items, config),
            TransferType::Upload => Transfer::upload(self.host, self.items, config),
            TransferType::Copy => {
                let (session, cache) = destination.ok_or_else(|| {
                    BackgroundError::Transfer("复制传输缺少目标会话".to_string())
                })?;
                if self.destinations.len() != self.items.len() {
                    return Err(BackgroundError::Transfer("复制目标与源数量不一致".to_string()));
                }
                let mapping = self
                    .items
                    .into_iter()
                    .map(|item| item.remote)
                    .zip(self.destinations)
                    .collect();
                Transfer::copy(self.host, mapping, session, cache, config)
            }
        };
        let transfer = transfer.with_uuid(self.uuid);
        transfer.bandwidth().set_limit(self.bandwidth);
        transfer.restore_progress(self.size, self.transferred, self.timestamp);
        Ok(transfer)
    }
}

/// 读取队列，文件缺失或损坏时返回空队列
pub fn load_queue(config_dir: &std::path::Path) -> Vec<TransferRecord> {
    let path = config_dir.join(QUEUE_FILE);
    let Ok(content) = fs::read_to_string(&path) else {
        return Vec::new();
    };
    match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(e) => {
            warn!("传输队列文件损坏，已忽略: {}", e);
            Vec::new()
        }
    }
}

pub fn save_queue(config_dir: &std::path::Path, records: &[TransferRecord]) -> io::Result<()> {
    fs::create_dir_all(config_dir)?;
    let content = serde_json::to_string_pretty(records)?;
    fs::write(config_dir.join(QUEUE_FILE), content)
}
