use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 传输过程中可能出现的错误
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("网络错误: {0}")]
    Network(#[from] reqwest::Error),

    #[error("服务器错误: HTTP {status} ({url})")]
    HttpStatus { status: u16, url: String },

    #[error("分片大小不匹配: 预期 {expected} 字节, 实际 {actual} 字节")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("无法获取远程文件长度: {0}")]
    ContentLengthMissing(String),

    #[error("远程文件长度无效: {0}")]
    BadContentLength(u64),

    #[error("本地文件大于远程文件: 本地 {local} 字节, 远程 {remote} 字节")]
    OutputTooLarge { local: u64, remote: u64 },

    #[error("无法读取临时目录 {path}: {source}")]
    TempDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO错误: {0}")]
    Io(#[from] io::Error),

    #[error("分片 {index} ({start}-{end}) 重试 {attempts} 次后仍然失败: {source}")]
    MaxRetriesExceeded {
        index: usize,
        start: u64,
        end: u64,
        attempts: u32,
        #[source]
        source: Box<TransferError>,
    },

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("下载被取消")]
    Cancelled,

    #[error("服务已关闭")]
    Shutdown,

    #[error("内部任务异常: {0}")]
    Join(String),
}

impl TransferError {
    /// 只有传输层错误会交给重试控制器，其余错误对整个传输都是致命的
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Network(_)
                | TransferError::HttpStatus { .. }
                | TransferError::SizeMismatch { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled | TransferError::Shutdown)
    }
}

impl From<tokio::task::JoinError> for TransferError {
    fn from(e: tokio::task::JoinError) -> Self {
        TransferError::Join(e.to_string())
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
