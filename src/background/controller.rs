//! 后台任务调度
//!
//! 声明了锁键的任务按键逐个执行（同一会话同时只有一个任务在用），
//! 其余任务直接并发执行。

use super::action::BackgroundAction;
use super::main_context::MainContext;
use super::registry::BackgroundActionRegistry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Slot = Arc<tokio::sync::Mutex<()>>;

/// 每个锁键一个执行槽，无人持有或等待时移除
#[derive(Default)]
struct LockSlots {
    slots: Mutex<HashMap<String, Slot>>,
}

impl LockSlots {
    fn acquire(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn release(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // 只剩映射表与调用者两份引用
        if Arc::strong_count(slot) <= 2 {
            slots.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct Controller {
    registry: Arc<BackgroundActionRegistry>,
    locks: Arc<LockSlots>,
    main: Arc<dyn MainContext>,
    closed: AtomicBool,
}

impl Controller {
    pub fn new(main: Arc<dyn MainContext>) -> Self {
        Self {
            registry: Arc::new(BackgroundActionRegistry::default()),
            locks: Arc::new(LockSlots::default()),
            main,
            closed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<BackgroundActionRegistry> {
        &self.registry
    }

    /// 是否有任务在排队或执行
    pub fn is_busy(&self) -> bool {
        !self.registry.is_empty()
    }

    /// 当前登记的锁键数
    pub fn lock_slots(&self) -> usize {
        self.locks.len()
    }

    /// 调度任务，重复登记或被拒绝时返回 `None`
    pub fn schedule(&self, action: Arc<dyn BackgroundAction>) -> Option<JoinHandle<()>> {
        if !self.registry.add(action.clone()) {
            warn!("任务已在执行，忽略: {}", action.name());
            return None;
        }
        action.init();

        let runtime = match Handle::try_current() {
            Ok(runtime) if !self.closed.load(Ordering::SeqCst) => runtime,
            _ => {
                error!("无法调度任务: {}", action.name());
                self.registry.remove(action.id());
                if let Err(e) = action.cleanup() {
                    error!("清理失败 {}: {}", action.name(), e);
                }
                return None;
            }
        };

        let registry = self.registry.clone();
        let main = self.main.clone();
        let locks = self.locks.clone();
        let slot = action.lock().map(|key| {
            let slot = locks.acquire(&key);
            (key, slot)
        });
        debug!("调度任务: {} (锁: {:?})", action.name(), action.lock());
        Some(runtime.spawn(async move {
            let _held = match slot {
                Some((key, slot)) => {
                    let guard = slot.clone().lock_owned().await;
                    // 任务结束或被中止时释放
                    Some(scopeguard::guard(guard, move |guard| {
                        drop(guard);
                        locks.release(&key, &slot);
                    }))
                }
                None => None,
            };
            execute(action, registry, main).await;
        }))
    }

    /// 拒绝新任务并取消已登记的任务
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.registry.cancel_all();
        info!("后台任务已关闭，取消 {} 个任务", self.registry.len());
    }
}

async fn execute(
    action: Arc<dyn BackgroundAction>,
    registry: Arc<BackgroundActionRegistry>,
    main: Arc<dyn MainContext>,
) {
    // 任务被中止或异常时同样收尾
    let finally = action.clone();
    scopeguard::defer! {
        registry.remove(finally.id());
        finally.finish();
        let cleanup = finally.clone();
        main.invoke(Box::new(move || {
            if let Err(e) = cleanup.cleanup() {
                error!("清理失败 {}: {}", cleanup.name(), e);
            }
        }));
    }

    if action.is_canceled() {
        debug!("任务已取消，不再执行: {}", action.name());
        return;
    }
    let result = match action.prepare().await {
        Ok(()) => action.run().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!("任务完成: {}", action.name()),
        Err(e) if e.is_cancel() => info!("任务已取消: {}", action.name()),
        Err(e) => error!("任务失败 {}: {}", action.name(), e),
    }
}
