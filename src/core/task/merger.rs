use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::registry::CompletionRegistry;
use crate::core::error::TransferResult;

/// 最终输出：调用方提供的写入流，或者一个文件路径
pub enum OutputTarget {
    File(PathBuf),
    Writer {
        /// 仅用于命名临时目录和进度回调
        name: PathBuf,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
    },
}

impl OutputTarget {
    pub fn name(&self) -> &Path {
        match self {
            OutputTarget::File(path) => path,
            OutputTarget::Writer { name, .. } => name,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, OutputTarget::File(_))
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTarget::File(path) => f.debug_tuple("File").field(path).finish(),
            OutputTarget::Writer { name, .. } => f.debug_struct("Writer").field("name", name).finish(),
        }
    }
}

/// 合并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Completed { merged_bytes: u64 },
    /// 被完成/取消信号打断，未合并的临时文件保留在磁盘上
    Aborted,
}

/// 以追加方式打开输出文件，必要时创建父目录
async fn open_output(target: OutputTarget) -> TransferResult<Box<dyn AsyncWrite + Send + Unpin>> {
    match target {
        OutputTarget::Writer { writer, .. } => Ok(writer),
        OutputTarget::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
            let file = fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            Ok(Box::new(file))
        }
    }
}

/// 唯一的合并例程：按序号依次把分片追加到输出，然后删除临时文件
pub struct Merger {
    registry: Arc<CompletionRegistry>,
    temp_dir: PathBuf,
    stop: CancellationToken,
}

impl Merger {
    pub fn new(registry: Arc<CompletionRegistry>, temp_dir: PathBuf, stop: CancellationToken) -> Self {
        Self { registry, temp_dir, stop }
    }

    /// `count_rx` 由规划例程在规划完成后发送分片总数
    pub async fn run(
        self,
        target: OutputTarget,
        count_rx: oneshot::Receiver<usize>,
    ) -> TransferResult<MergeOutcome> {
        // 调用方的写入流只刷新不关闭，由调用方自己决定何时关闭
        let owned = target.is_file();
        let mut output = open_output(target).await?;

        let count = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Ok(MergeOutcome::Aborted),
            count = count_rx => match count {
                Ok(count) => count,
                // 规划失败，错误已经由规划例程上报
                Err(_) => return Ok(MergeOutcome::Aborted),
            },
        };

        let mut merged_bytes = 0u64;
        for index in 0..count {
            if self.stop.is_cancelled() {
                return Ok(MergeOutcome::Aborted);
            }
            let Some(segment) = self.registry.take(index, &self.stop).await else {
                return Ok(MergeOutcome::Aborted);
            };
            let mut temp = fs::File::open(&segment.temp_file).await?;
            let copied = tokio::io::copy(&mut temp, &mut output).await?;
            output.flush().await?;
            drop(temp);
            if let Err(e) = fs::remove_file(&segment.temp_file).await {
                warn!("删除临时文件失败: {}: {}", segment.temp_file.display(), e);
            }
            merged_bytes += copied;
            debug!("已合并分片 {} ({}-{})", index, segment.start, segment.end);
        }
        if owned {
            output.shutdown().await?;
        } else {
            output.flush().await?;
        }

        fs::remove_dir_all(&self.temp_dir).await?;
        info!("合并完成, 已删除临时目录 {}", self.temp_dir.display());
        Ok(MergeOutcome::Completed { merged_bytes })
    }
}
