use crate::error::Result;
use async_trait::async_trait;

/// 可调度的后台任务
///
/// 生命周期：`init` 在登记后立即调用；执行时先 `prepare` 再 `run`；
/// 无论成败都会调用 `finish`，随后在主上下文中调用 `cleanup`。
#[async_trait]
pub trait BackgroundAction: Send + Sync {
    /// 去重用的标识，同一标识同时只能登记一次
    fn id(&self) -> &str;

    fn name(&self) -> String {
        self.id().to_string()
    }

    /// 互斥锁键，同一键的任务逐个执行；`None` 表示可并发
    fn lock(&self) -> Option<String> {
        None
    }

    fn init(&self) {}

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self) -> Result<()>;

    fn finish(&self) {}

    /// 在主上下文中执行，错误只记录
    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn cancel(&self);

    fn is_canceled(&self) -> bool;
}
