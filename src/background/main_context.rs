//! 主上下文：清理回调在单一线程上执行，异常被捕获并记录

use std::any::Any;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait MainContext: Send + Sync {
    fn invoke(&self, job: Job);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "未知异常".to_string()
}

fn run_caught(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        error!("主上下文任务异常: {}", panic_message(panic.as_ref()));
    }
}

/// 在调用线程上直接执行（无界面环境）
pub struct InlineContext;

impl MainContext for InlineContext {
    fn invoke(&self, job: Job) {
        run_caught(job);
    }
}

/// 独立的主线程，按提交顺序执行
pub struct MainThread {
    sender: Mutex<Option<Sender<Job>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MainThread {
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(job) = receiver.recv() {
                run_caught(job);
            }
            debug!("主线程退出");
        })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// 执行完已提交的任务后退出
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("主线程异常退出");
            }
        }
    }
}

impl MainContext for MainThread {
    fn invoke(&self, job: Job) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            warn!("主线程已关闭，任务被丢弃");
            return;
        };
        if sender.send(job).is_err() {
            warn!("主线程已关闭，任务被丢弃");
        }
    }
}

impl Drop for MainThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_panic_does_not_stop_main_thread() {
        let main = MainThread::spawn("test-main").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        main.invoke(Box::new(|| panic!("cleanup failed")));
        let counter = count.clone();
        main.invoke(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        main.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        // 关闭后提交的任务被丢弃
        main.invoke(Box::new(|| unreachable!()));
    }

    #[test]
    fn test_inline_context_catches_panic() {
        InlineContext.invoke(Box::new(|| panic!("boom")));
    }
}
