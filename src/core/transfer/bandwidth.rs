//! 按传输限速（令牌桶式：按已发送字节计算应耗时间）

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct BandwidthThrottle {
    /// 字节/秒，0 表示不限速
    limit: AtomicU64,
    window: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    start: Instant,
    bytes: u64,
}

impl BandwidthThrottle {
    pub fn new(limit: u64) -> Self {
        Self {
            limit: AtomicU64::new(limit),
            window: Mutex::new(Window {
                start: Instant::now(),
                bytes: 0,
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// 修改限速，重新开始计时
    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Relaxed);
        self.restart();
    }

    pub fn restart(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.start = Instant::now();
        window.bytes = 0;
    }

    /// 登记已发送字节，需要时等待
    pub async fn acquire(&self, bytes: u64) {
        if let Some(delay) = self.delay(bytes) {
            tokio::time::sleep(delay).await;
        }
    }

    fn delay(&self, bytes: u64) -> Option<Duration> {
        let bps = self.limit();
        if bps == 0 {
            return None;
        }
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.bytes += bytes;
        let elapsed = window.start.elapsed().as_secs_f64();
        let expected = window.bytes as f64 / bps as f64;
        (expected > elapsed).then(|| Duration::from_secs_f64(expected - elapsed))
    }
}

impl Default for BandwidthThrottle {
    fn default() -> Self {
        Self::unlimited()
    }
}
