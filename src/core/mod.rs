pub mod action;
pub mod cache;
pub mod checksum;
pub mod filter;
pub mod pool;
pub mod progress;
pub mod prompt;
pub mod status;
pub mod target;
pub mod transfer;
pub mod worker;

pub use action::TransferAction;
pub use cache::ListCache;
pub use filter::{FilterStrategy, PathFilter, TransferPathFilter};
pub use pool::{PooledSession, SessionFactory, SessionPool};
pub use progress::{TransferListener, TransferOutcome, TransferProgressReport};
pub use prompt::{RememberingErrorCallback, TransferErrorCallback, TransferPrompt};
pub use status::TransferStatus;
pub use target::{Target, TargetAccess, TargetMapping};
pub use transfer::{Transfer, TransferItem, TransferKind, TransferRecord, TransferType};
pub use worker::{Concurrency, TransferOptions, TransferWorker};
