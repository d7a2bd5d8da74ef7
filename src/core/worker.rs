//! 传输工作器：先准备再传输的两阶段执行
//!
//! 准备阶段递归遍历所有根条目，用过滤器计算每个文件的 `TransferStatus`
//! 并累计总大小；传输阶段按状态表移动数据。状态表中剩余的条目数即为
//! 尚未处理的工作量。
//!
//! 工作单元的执行方式由 `Concurrency` 决定：串行时在当前会话上直接执行，
//! 池化时派发到独立任务并从 `SessionPool` 借用会话。

use super::action::TransferAction;
use super::cache::ListCache;
use super::filter::{PathFilter, TransferPathFilter};
use super::pool::SessionPool;
use super::progress::{self, DisabledTransferListener, TransferListener, TransferOutcome};
use super::prompt::{DisabledTransferErrorCallback, FixedTransferPrompt, TransferErrorCallback, TransferPrompt};
use super::status::TransferStatus;
use super::transfer::{Transfer, TransferItem};
use crate::config::TransferConfig;
use crate::error::{BackgroundError, Result};
use crate::model::{AttributedList, Path};
use crate::session::{ListProgressListener, Session};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferOptions {
    /// 强制续传
    pub resume: bool,
    /// 重新加载，使用重载动作
    pub reload: bool,
}

/// 工作单元的执行方式
#[derive(Clone)]
pub enum Concurrency {
    Serial,
    Pooled(Arc<SessionPool>),
}

impl Concurrency {
    /// 单连接的池退化为串行
    pub fn from_pool(pool: Arc<SessionPool>) -> Self {
        if pool.size() > 1 {
            Concurrency::Pooled(pool)
        } else {
            Concurrency::Serial
        }
    }
}

/// 只接受部分条目（如用户在队列中的勾选）
pub type Selection = Arc<dyn Fn(&TransferItem) -> bool + Send + Sync>;

/// 一次运行内共享的会话与过滤器
struct Run {
    session: Arc<Session>,
    filter: PathFilter,
}

pub struct TransferWorker {
    transfer: Arc<Transfer>,
    cache: Arc<ListCache>,
    options: TransferOptions,
    prompt: Arc<dyn TransferPrompt>,
    error: Arc<dyn TransferErrorCallback>,
    listener: Arc<dyn TransferListener>,
    selection: Option<Selection>,
    concurrency: Concurrency,
    progress_interval: Duration,
    table: Mutex<HashMap<TransferItem, Arc<TransferStatus>>>,
    /// 准备阶段列出的子项，传输阶段使用后移除
    children: Mutex<HashMap<TransferItem, Vec<TransferItem>>>,
    canceled: AtomicBool,
}

/// 列表分块时检查取消，已取消则截断列表
struct CancelingListener<'a> {
    worker: &'a TransferWorker,
}

impl ListProgressListener for CancelingListener<'_> {
    fn chunk(&self, _directory: &Path, _list: &AttributedList) -> Result<()> {
        if self.worker.is_canceled() {
            return Err(BackgroundError::Canceled);
        }
        Ok(())
    }
}

impl TransferWorker {
    pub fn new(transfer: Arc<Transfer>, cache: Arc<ListCache>) -> Self {
        Self {
            transfer,
            cache,
            options: TransferOptions::default(),
            prompt: Arc::new(FixedTransferPrompt(TransferAction::CANCEL)),
            error: Arc::new(DisabledTransferErrorCallback),
            listener: Arc::new(DisabledTransferListener),
            selection: None,
            concurrency: Concurrency::Serial,
            progress_interval: Duration::from_millis(500),
            table: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            canceled: AtomicBool::new(false),
        }
    }

    /// 按配置设置进度上报间隔
    pub fn from_config(transfer: Arc<Transfer>, cache: Arc<ListCache>, config: &TransferConfig) -> Self {
        Self::new(transfer, cache)
            .with_progress_interval(Duration::from_millis(config.queue.progress_interval_ms.max(1)))
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn TransferPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_error_callback(mut self, error: Arc<dyn TransferErrorCallback>) -> Self {
        self.error = error;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransferListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn transfer(&self) -> &Arc<Transfer> {
        &self.transfer
    }

    fn table(&self) -> MutexGuard<'_, HashMap<TransferItem, Arc<TransferStatus>>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn children(&self) -> MutexGuard<'_, HashMap<TransferItem, Vec<TransferItem>>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 待传输的条目数
    pub fn pending(&self) -> usize {
        self.table().len()
    }

    pub fn status(&self, item: &TransferItem) -> Option<Arc<TransferStatus>> {
        self.table().get(item).cloned()
    }

    /// 取消所有已知文件并停止后续的远程操作
    pub fn cancel(&self) {
        for status in self.table().values() {
            status.set_canceled();
        }
        self.canceled.store(true, Ordering::SeqCst);
        info!("取消传输: {}", self.transfer.name());
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            return Err(BackgroundError::Canceled);
        }
        Ok(())
    }

    /// 执行传输
    pub async fn run(self: &Arc<Self>, session: &Arc<Session>) -> Result<TransferOutcome> {
        let action = self
            .transfer
            .action(
                session,
                &self.cache,
                self.options.resume,
                self.options.reload,
                self.prompt.as_ref(),
            )
            .await?;
        info!("开始传输 {} ({})", self.transfer.name(), action);

        self.transfer.reset();
        self.transfer.start();
        self.listener.start(&self.transfer);
        let reporter = progress::spawn_reporter(
            self.transfer.clone(),
            self.listener.clone(),
            self.progress_interval,
        );

        let run = Arc::new(Run {
            session: session.clone(),
            filter: self.transfer.filter(session, &self.cache, &action),
        });
        let result = self.execute(&run).await;

        reporter.abort();
        self.transfer.stop();
        self.listener.stop(&self.transfer);
        // 取消或中止的运行即使计数相等也不算完成
        let outcome = if result.is_ok() && self.transfer.is_complete() {
            TransferOutcome::Complete
        } else {
            TransferOutcome::Incomplete
        };
        self.listener.complete(&self.transfer, outcome);
        self.table().clear();
        self.children().clear();

        match &result {
            Ok(()) => info!("传输结束 {}: {:?}", self.transfer.name(), outcome),
            Err(e) if e.is_cancel() => info!("传输已取消: {}", self.transfer.name()),
            Err(e) => warn!("传输失败 {}: {}", self.transfer.name(), e),
        }
        result.map(|()| outcome)
    }

    async fn execute(self: &Arc<Self>, run: &Arc<Run>) -> Result<()> {
        let roots = self.transfer.roots().to_vec();
        let prepare = roots
            .iter()
            .map(|root| self.clone().prepare(run.clone(), root.clone(), None))
            .collect();
        self.each(prepare).await?;
        debug!("准备完成，共 {} 项待传输", self.pending());

        let transfer = roots
            .into_iter()
            .map(|root| self.clone().transfer_item(run.clone(), root))
            .collect();
        self.each(transfer).await
    }

    /// 依次或并发地等待一组递归步骤
    async fn each(&self, steps: Vec<BoxFuture<'static, Result<()>>>) -> Result<()> {
        match self.concurrency {
            Concurrency::Serial => {
                for step in steps {
                    step.await?;
                }
                Ok(())
            }
            Concurrency::Pooled(_) => {
                // 出错后停止派发新单元，但等待已开始的步骤全部结束再返回
                let mut running: FuturesUnordered<_> = steps.into_iter().collect();
                let mut failure = None;
                while let Some(result) = running.next().await {
                    if let Err(e) = result {
                        if failure.is_none() {
                            self.canceled.store(true, Ordering::SeqCst);
                            failure = Some(e);
                        }
                    }
                }
                failure.map_or(Ok(()), Err)
            }
        }
    }

    /// 提交工作单元
    async fn submit<F, Fut, T>(&self, run: &Arc<Run>, unit: F) -> Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.check_canceled()?;
        match &self.concurrency {
            Concurrency::Serial => unit(run.session.clone()).await,
            Concurrency::Pooled(pool) => {
                let pool = pool.clone();
                // 运行被丢弃时 JoinSet 中止尚未结束的单元
                let mut units = JoinSet::new();
                units.spawn(async move {
                    let borrowed = pool.borrow().await?;
                    unit(borrowed.session().clone()).await
                });
                match units.join_next().await {
                    Some(joined) => {
                        joined.map_err(|e| BackgroundError::Transfer(format!("工作单元异常: {}", e)))?
                    }
                    None => Err(BackgroundError::Canceled),
                }
            }
        }
    }

    /// 单个文件出错：询问是否继续，继续则丢弃该文件
    fn recover(&self, item: &TransferItem, error: BackgroundError) -> Result<()> {
        if error.is_cancel() {
            return Err(error);
        }
        self.table().remove(item);
        self.check_canceled()?;
        warn!("处理失败 {}: {}", item.remote, error);
        if self.error.prompt(item, &error)? {
            info!("忽略错误继续: {}", item.remote);
            Ok(())
        } else {
            self.cancel();
            Err(BackgroundError::Canceled)
        }
    }

    fn prepare(
        self: Arc<Self>,
        run: Arc<Run>,
        item: TransferItem,
        parent: Option<Arc<TransferStatus>>,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            self.check_canceled()?;
            if let Some(selection) = &self.selection {
                if !selection(&item) {
                    debug!("未选中，跳过: {}", item.remote);
                    return Ok(());
                }
            }
            let accepted = match run.filter.accept(&item, parent.as_deref()).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.recover(&item, e)?;
                    false
                }
            };
            if !accepted {
                debug!("过滤器未接受: {}", item.remote);
                return Ok(());
            }

            let worker = self.clone();
            let unit_run = run.clone();
            let unit_item = item.clone();
            let prepared = self
                .submit(&run, move |session| async move {
                    worker.prepare_unit(&unit_run, &session, unit_item, parent).await
                })
                .await?;

            let Some((status, children)) = prepared else {
                return Ok(());
            };
            let steps = children
                .into_iter()
                .map(|child| self.clone().prepare(run.clone(), child, Some(status.clone())))
                .collect();
            self.each(steps).await
        }
        .boxed()
    }

    /// 计算状态、登记并累计大小；目录则列出子项
    async fn prepare_unit(
        &self,
        run: &Run,
        session: &Session,
        item: TransferItem,
        parent: Option<Arc<TransferStatus>>,
    ) -> Result<Option<(Arc<TransferStatus>, Vec<TransferItem>)>> {
        let prepared = async {
            let status = Arc::new(run.filter.prepare(&item, parent.as_deref()).await?);
            self.check_canceled()?;
            self.table().insert(item.clone(), status.clone());
            run.filter.apply(&item, &status).await?;
            self.transfer.add_size(status.offset() + status.length());
            self.transfer.add_transferred(status.offset());

            let children = if item.remote.is_directory() {
                let listener = CancelingListener { worker: self };
                let children = self
                    .transfer
                    .list(session, &self.cache, &item, &listener)
                    .await?;
                self.children().insert(item.clone(), children.clone());
                children
            } else {
                Vec::new()
            };
            Ok((status, children))
        }
        .await;

        match prepared {
            Ok(prepared) => Ok(Some(prepared)),
            Err(e) => self.recover(&item, e).map(|()| None),
        }
    }

    fn transfer_item(self: Arc<Self>, run: Arc<Run>, item: TransferItem) -> BoxFuture<'static, Result<()>> {
        async move {
            self.check_canceled()?;
            let Some(status) = self.status(&item) else {
                debug!("未准备，跳过: {}", item.remote);
                return Ok(());
            };

            let worker = self.clone();
            let unit_item = item.clone();
            let unit_status = status.clone();
            let transferred = self
                .submit(&run, move |session| async move {
                    worker.check_canceled()?;
                    match worker
                        .transfer
                        .transfer(&session, &worker.cache, &unit_item, &unit_status)
                        .await
                    {
                        Ok(()) => Ok(true),
                        Err(e) => worker.recover(&unit_item, e).map(|()| false),
                    }
                })
                .await?;

            let children = self.children().remove(&item).unwrap_or_default();
            if !transferred {
                return Ok(());
            }
            if !children.is_empty() {
                let steps = children
                    .into_iter()
                    .map(|child| self.clone().transfer_item(run.clone(), child))
                    .collect();
                self.each(steps).await?;
                self.cache.invalidate(&item.remote);
            }

            run.filter.complete(&item, &status).await;
            status.set_complete();
            self.table().remove(&item);
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
