//! 后台执行：去重登记、按锁串行或并发派发，以及在主上下文中清理

pub mod action;
pub mod controller;
pub mod main_context;
pub mod registry;
pub mod session_action;

pub use action::BackgroundAction;
pub use controller::Controller;
pub use main_context::{InlineContext, MainContext, MainThread};
pub use registry::BackgroundActionRegistry;
pub use session_action::{SessionBackgroundAction, Worker};
