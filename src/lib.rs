//! chunkdown: 分片并发、可断点续传的 HTTP 文件下载

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use crate::core::task::{OutputTarget, ProgressEvent, ProgressFn, RangeClient, ReqwestClient};
pub use crate::core::{ChunkedTransfer, TransferContext, TransferError, TransferOptions, TransferReport};
