use crate::model::Host;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    WillOpen,
    DidOpen,
    WillClose,
    DidClose,
}

pub trait ConnectionListener: Send + Sync {
    fn on_event(&self, host: &Host, event: ConnectionEvent);
}

/// 状态消息（“正在连接”等）
pub trait ProgressListener: Send + Sync {
    fn message(&self, message: &str);
}

/// 协议会话记录
pub trait TranscriptListener: Send + Sync {
    fn log(&self, request: bool, message: &str);
}

/// 监听器集合，通知时遍历快照，允许在回调中增删
pub struct ListenerSet<T: ?Sized> {
    listeners: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn add(&self, listener: Arc<T>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn remove(&self, listener: &Arc<T>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn notify(&self, f: impl Fn(&T)) {
        for listener in self.snapshot() {
            f(&listener);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
