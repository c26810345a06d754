//! Core: 分片传输引擎，包括规划、并发下载、重试、有序合并和生命周期管理

pub mod context;
pub mod error;
pub mod task;
pub mod transfer;

pub use context::{RunningTransfer, TransferContext, TransferGuard};
pub use error::{TransferError, TransferResult};
pub use transfer::{ChunkedTransfer, TransferOptions, TransferReport};
