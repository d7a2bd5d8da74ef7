//! 传输进度上报

use super::transfer::Transfer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// 一次运行的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    /// 所有字节均已传输
    Complete,
    Incomplete,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgressReport {
    pub transferId: String,
    pub bytesTransferred: u64,
    pub bytesTotal: u64,
    /// 字节/秒
    pub speed: u64,
    /// 预计剩余秒数
    pub eta: u64,
}

pub trait TransferListener: Send + Sync {
    fn start(&self, _transfer: &Transfer) {}

    fn stop(&self, _transfer: &Transfer) {}

    fn progress(&self, _report: &TransferProgressReport) {}

    fn complete(&self, _transfer: &Transfer, _outcome: TransferOutcome) {}
}

pub struct DisabledTransferListener;

impl TransferListener for DisabledTransferListener {}

/// 周期性计算速度与剩余时间，直到任务被 `abort`
pub fn spawn_reporter(
    transfer: Arc<Transfer>,
    listener: Arc<dyn TransferListener>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_bytes = transfer.transferred().unwrap_or(0);
        let mut last_time = Instant::now();

        loop {
            tokio::time::sleep(interval).await;

            let bytes = transfer.transferred().unwrap_or(0);
            let total = transfer.size().unwrap_or(0);

            let now = Instant::now();
            let elapsed = now.duration_since(last_time).as_secs_f64();
            let speed = if elapsed > 0.0 {
                (bytes.saturating_sub(last_bytes) as f64 / elapsed) as u64
            } else {
                0
            };
            last_bytes = bytes;
            last_time = now;

            let remaining = total.saturating_sub(bytes);
            let eta = if speed > 0 { remaining / speed } else { 0 };

            listener.progress(&TransferProgressReport {
                transferId: transfer.uuid().to_string(),
                bytesTransferred: bytes,
                bytesTotal: total,
                speed,
                eta,
            });
        }
    })
}
