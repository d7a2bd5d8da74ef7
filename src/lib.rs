//! 多协议传输引擎
//!
//! 会话与连接管理、按动作决定的文件过滤、下载/上传/复制传输、
//! 先准备后传输的工作器以及后台任务调度。

pub mod background;
pub mod config;
pub mod core;
pub mod error;
pub mod local;
pub mod logging;
pub mod model;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::core::{Transfer, TransferAction, TransferItem, TransferStatus, TransferWorker};
pub use background::Controller;
pub use config::TransferConfig;
pub use error::{BackgroundError, Result};
pub use session::{ConnectionService, Session};
pub use storage::create_session;
