//! `task` 模块包含了单个分片传输用到的各个部件
//!
//! 主要包括：
//! - `segment`: 分片描述和临时文件命名
//! - `planner`: 根据临时目录里已有的分片规划剩余区间
//! - `fetcher`: HTTP 区间请求和分片下载
//! - `retry`: 有上限的重试策略
//! - `registry`: 已完成分片的登记表
//! - `merger`: 按序合并例程
//! - `progress`: 进度聚合和回调

pub mod fetcher;
pub mod merger;
pub mod planner;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod segment;

pub use fetcher::{ByteStream, RangeClient, ReqwestClient};
pub use merger::{MergeOutcome, OutputTarget};
pub use progress::{ProgressEvent, ProgressFn};
pub use retry::RetryPolicy;
pub use segment::Segment;
