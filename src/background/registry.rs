use super::action::BackgroundAction;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 已登记（排队或执行中）的后台任务
#[derive(Default)]
pub struct BackgroundActionRegistry {
    actions: Mutex<HashMap<String, Arc<dyn BackgroundAction>>>,
}

impl BackgroundActionRegistry {
    fn actions(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn BackgroundAction>>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 已存在同一标识时返回 `false`
    pub fn add(&self, action: Arc<dyn BackgroundAction>) -> bool {
        let mut actions = self.actions();
        if actions.contains_key(action.id()) {
            return false;
        }
        actions.insert(action.id().to_string(), action);
        true
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn BackgroundAction>> {
        self.actions().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn BackgroundAction>> {
        self.actions().values().cloned().collect()
    }

    pub fn cancel_all(&self) {
        for action in self.snapshot() {
            action.cancel();
        }
    }
}
