//! 交互回调：动作选择与出错后是否继续

use super::action::TransferAction;
use super::transfer::TransferItem;
use crate::error::{BackgroundError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// 目标已存在时询问动作
pub trait TransferPrompt: Send + Sync {
    fn prompt(&self, items: &[TransferItem]) -> Result<TransferAction>;
}

/// 单个文件失败时询问是否继续，`Ok(false)` 表示中止整个传输
pub trait TransferErrorCallback: Send + Sync {
    fn prompt(&self, item: &TransferItem, error: &BackgroundError) -> Result<bool>;
}

/// 总是给出固定动作
pub struct FixedTransferPrompt(pub TransferAction);

impl TransferPrompt for FixedTransferPrompt {
    fn prompt(&self, _items: &[TransferItem]) -> Result<TransferAction> {
        Ok(self.0.clone())
    }
}

/// 无交互环境，遇错即中止
pub struct DisabledTransferErrorCallback;

impl TransferErrorCallback for DisabledTransferErrorCallback {
    fn prompt(&self, _item: &TransferItem, _error: &BackgroundError) -> Result<bool> {
        Ok(false)
    }
}

/// 记住第一次的回答，本次运行中不再询问
pub struct RememberingErrorCallback {
    inner: Arc<dyn TransferErrorCallback>,
    answer: Mutex<Option<bool>>,
}

impl RememberingErrorCallback {
    pub fn new(inner: Arc<dyn TransferErrorCallback>) -> Self {
        Self {
            inner,
            answer: Mutex::new(None),
        }
    }

    pub fn forget(&self) {
        *self.answer.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TransferErrorCallback for RememberingErrorCallback {
    fn prompt(&self, item: &TransferItem, error: &BackgroundError) -> Result<bool> {
        let mut answer = self.answer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(remembered) = *answer {
            debug!("沿用之前的选择 ({}): {}", remembered, item);
            return Ok(remembered);
        }
        let decided = self.inner.prompt(item, error)?;
        *answer = Some(decided);
        Ok(decided)
    }
}
