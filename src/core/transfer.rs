//! 一次分片传输的完整生命周期：探测长度、启动工作池、规划分派、按序合并

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::fs;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::TransferContext;
use super::error::{TransferError, TransferResult};
use super::task::fetcher::{fetch_segment, RangeClient};
use super::task::merger::{MergeOutcome, Merger, OutputTarget};
use super::task::planner::plan_segments;
use super::task::progress::{ProgressFn, TransferProgress};
use super::task::registry::CompletionRegistry;
use super::task::retry::{RetryDecision, RetryPolicy};
use super::task::segment::Segment;
use crate::utils::path::{absolute_path, temp_dir_for};
use crate::utils::validator::is_valid_url;

pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 50;
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// 传输参数，为 0 的项在运行前会被替换成默认值
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// 常驻工作例程数
    pub concurrency: usize,
    /// 同时进行中的分片请求上限，与工作例程数互相独立
    pub max_in_flight: usize,
    pub chunk_size: u64,
    pub max_retry: u32,
    pub retry_delay: Duration,
    pub temp_root: PathBuf,
    /// 删除已存在的输出文件和临时分片，从头下载
    pub overwrite: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retry: DEFAULT_MAX_RETRY,
            retry_delay: Duration::from_millis(500),
            temp_root: std::env::temp_dir(),
            overwrite: false,
        }
    }
}

impl TransferOptions {
    fn ensure(&mut self) {
        if self.concurrency == 0 {
            self.concurrency = 1;
        }
        if self.max_in_flight == 0 {
            self.max_in_flight = DEFAULT_MAX_IN_FLIGHT;
        }
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.max_retry == 0 {
            self.max_retry = DEFAULT_MAX_RETRY;
        }
        if self.temp_root.as_os_str().is_empty() {
            self.temp_root = std::env::temp_dir();
        }
    }
}

/// 成功结束后的统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub id: Uuid,
    pub output: PathBuf,
    pub total_size: u64,
    /// 本次从网络获取的字节
    pub fetched_bytes: u64,
}

/// 分片并发、可续传的单文件下载
pub struct ChunkedTransfer {
    url: String,
    client: Arc<dyn RangeClient>,
    output: OutputTarget,
    options: TransferOptions,
    total_size: Option<u64>,
    on_progress: Option<ProgressFn>,
    on_segment_progress: Option<ProgressFn>,
}

impl ChunkedTransfer {
    pub fn new(url: impl Into<String>, client: Arc<dyn RangeClient>, output: OutputTarget) -> Self {
        Self {
            url: url.into(),
            client,
            output,
            options: TransferOptions::default(),
            total_size: None,
            on_progress: None,
            on_segment_progress: None,
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// 已知总长度时跳过 HEAD 探测
    pub fn with_total_size(mut self, total: u64) -> Self {
        self.total_size = Some(total);
        self
    }

    /// 传输级进度，按整个分片上报
    pub fn on_progress(mut self, sink: ProgressFn) -> Self {
        self.on_progress = Some(sink);
        self
    }

    /// 分片级进度，每读到一块响应体就上报
    pub fn on_segment_progress(mut self, sink: ProgressFn) -> Self {
        self.on_segment_progress = Some(sink);
        self
    }

    /// 执行传输，直到成功、致命错误或被取消。
    ///
    /// `cancel` 只作用于这一次调用；`ctx` 的全局取消作用于所有传输。
    /// 返回前会等待所有工作例程和合并例程退出。
    pub async fn run(
        mut self,
        ctx: &TransferContext,
        cancel: Option<CancellationToken>,
    ) -> TransferResult<TransferReport> {
        if !is_valid_url(&self.url) {
            return Err(TransferError::InvalidUrl(self.url));
        }
        let guard = ctx.register(&self.url, self.output.name())?;
        self.options.ensure();

        let output_path = absolute_path(self.output.name())?;
        let temp_dir = temp_dir_for(&self.options.temp_root, &output_path)?;

        // cancel 由全局信号或调用方信号触发；done 在传输结束时触发，也随 cancel 一起触发
        let cancelled = ctx.token().child_token();
        let done = cancelled.child_token();
        if let Some(caller) = cancel {
            let (cancelled, done) = (cancelled.clone(), done.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => cancelled.cancel(),
                    _ = done.cancelled() => {}
                }
            });
        }

        let result = self.execute(ctx, &output_path, &temp_dir, &cancelled, &done).await;
        done.cancel();

        match result {
            Ok(fetched_bytes) => {
                info!("下载完成: {} -> {}", self.url, output_path.display());
                Ok(TransferReport {
                    id: guard.id(),
                    output: output_path,
                    total_size: self.total_size.unwrap_or_default(),
                    fetched_bytes,
                })
            }
            Err(e) => {
                if e.is_cancelled() {
                    warn!("下载已取消: {}, 临时目录保留在 {}", self.url, temp_dir.display());
                } else {
                    error!("下载失败: {}: {}", self.url, e);
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        ctx: &TransferContext,
        output_path: &Path,
        temp_dir: &Path,
        cancelled: &CancellationToken,
        done: &CancellationToken,
    ) -> TransferResult<u64> {
        let total = match self.total_size {
            Some(total) if total > 0 => total,
            _ => {
                let total = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => return Err(cancel_error(ctx)),
                    total = self.client.content_length(&self.url) => total?,
                };
                if total == 0 {
                    return Err(TransferError::BadContentLength(total));
                }
                total
            }
        };
        self.total_size = Some(total);
        let is_file = self.output.is_file();

        if !self.options.overwrite && is_file {
            if let Ok(meta) = fs::metadata(output_path).await {
                if meta.len() == total {
                    info!("文件已存在且大小一致, 跳过下载: {}", output_path.display());
                    // 上一次运行可能在删除临时目录之前被打断
                    if fs::metadata(temp_dir).await.is_ok() {
                        fs::remove_dir_all(temp_dir).await?;
                    }
                    return Ok(0);
                }
            }
        }

        if self.options.overwrite {
            if is_file && fs::metadata(output_path).await.is_ok() {
                fs::remove_file(output_path).await?;
            }
            if fs::metadata(temp_dir).await.is_ok() {
                fs::remove_dir_all(temp_dir).await?;
            }
        }
        fs::create_dir_all(temp_dir)
            .await
            .map_err(|source| TransferError::TempDir { path: temp_dir.to_path_buf(), source })?;

        // 合并后的临时文件会被删除，输出文件已有的长度就是已合并的前缀
        let resume_offset = if is_file {
            fs::metadata(output_path).await.map(|m| m.len()).unwrap_or(0)
        } else {
            0
        };

        info!(
            "开始下载: {} -> {} ({} 字节, 已有 {} 字节, {} 个工作例程, 分片 {} 字节)",
            self.url,
            output_path.display(),
            total,
            resume_offset,
            self.options.concurrency,
            self.options.chunk_size
        );

        let progress = Arc::new(TransferProgress::new(
            output_path.to_string_lossy(),
            total,
            self.on_progress.clone(),
        ));
        let registry = Arc::new(CompletionRegistry::new());
        let (task_tx, task_rx) = mpsc::channel::<Segment>(self.options.concurrency);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel::<Segment>();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<TransferError>();
        let queue = Arc::new(TaskQueue::new(task_rx, retry_rx));
        let in_flight = Arc::new(Semaphore::new(self.options.max_in_flight));

        let mut workers = JoinSet::new();
        for id in 0..self.options.concurrency {
            let worker = Worker {
                id,
                url: self.url.clone(),
                client: self.client.clone(),
                queue: queue.clone(),
                retry_tx: retry_tx.clone(),
                fatal_tx: fatal_tx.clone(),
                in_flight: in_flight.clone(),
                registry: registry.clone(),
                progress: progress.clone(),
                segment_sink: self.on_segment_progress.clone(),
                policy: RetryPolicy::new(self.options.max_retry, self.options.retry_delay),
                done: done.clone(),
            };
            workers.spawn(worker.run());
        }
        drop(retry_tx);

        let (count_tx, count_rx) = oneshot::channel();
        let mut dispatcher = tokio::spawn(dispatch(
            Plan {
                total,
                chunk_size: self.options.chunk_size,
                temp_dir: temp_dir.to_path_buf(),
                resume_offset,
            },
            progress.clone(),
            task_tx,
            count_tx,
            fatal_tx,
            done.clone(),
        ));
        let mut dispatcher_finished = false;

        let output = std::mem::replace(&mut self.output, OutputTarget::File(output_path.to_path_buf()));
        let merger = Merger::new(registry, temp_dir.to_path_buf(), done.clone());
        let mut merger = tokio::spawn(merger.run(output, count_rx));
        let mut merger_finished = false;

        let result = loop {
            tokio::select! {
                biased;
                // 规划例程 panic 时合并例程会随之中止，先检查它才能报告真正的原因
                joined = &mut dispatcher, if !dispatcher_finished => {
                    dispatcher_finished = true;
                    if let Err(e) = joined {
                        error!("规划例程异常退出: {}", e);
                        break Err(TransferError::from(e));
                    }
                }
                merged = &mut merger => {
                    merger_finished = true;
                    break match merged {
                        Ok(Ok(MergeOutcome::Completed { merged_bytes })) => {
                            debug!("共合并 {} 字节", merged_bytes);
                            Ok(progress.fetched())
                        }
                        // 规划失败时合并例程也会中止，此时优先返回规划错误
                        Ok(Ok(MergeOutcome::Aborted)) => Err(fatal_rx.try_recv().unwrap_or_else(|_| cancel_error(ctx))),
                        Ok(Err(e)) => Err(e),
                        Err(e) => Err(TransferError::from(e)),
                    };
                }
                Some(e) = fatal_rx.recv() => break Err(e),
                // 工作例程 panic 后它手上的分片永远不会登记，合并例程会一直等下去
                Some(joined) = workers.join_next() => {
                    if let Err(e) = joined {
                        error!("工作例程异常退出: {}", e);
                        break Err(TransferError::from(e));
                    }
                }
                _ = cancelled.cancelled() => break Err(cancel_error(ctx)),
            }
        };

        // 通知所有例程退出，并等待它们收尾
        done.cancel();
        if !dispatcher_finished {
            let _ = dispatcher.await;
        }
        if !merger_finished {
            let _ = merger.await;
        }
        while workers.join_next().await.is_some() {}

        result
    }
}

/// 全局信号触发的取消报告为 Shutdown，其余为 Cancelled
fn cancel_error(ctx: &TransferContext) -> TransferError {
    if ctx.is_shutdown() {
        TransferError::Shutdown
    } else {
        TransferError::Cancelled
    }
}

struct Plan {
    total: u64,
    chunk_size: u64,
    temp_dir: PathBuf,
    resume_offset: u64,
}

/// 规划/分派例程：规划完成后把全部分片（包括已完成的）依次送入任务队列
async fn dispatch(
    plan: Plan,
    progress: Arc<TransferProgress>,
    task_tx: mpsc::Sender<Segment>,
    count_tx: oneshot::Sender<usize>,
    fatal_tx: mpsc::UnboundedSender<TransferError>,
    done: CancellationToken,
) {
    if done.is_cancelled() {
        return;
    }
    let segments =
        match plan_segments(plan.total, plan.chunk_size, &plan.temp_dir, plan.resume_offset).await {
            Ok(segments) => segments,
            Err(e) => {
                let _ = fatal_tx.send(e);
                return;
            }
        };
    if plan.resume_offset > 0 {
        progress.record_existing(plan.resume_offset);
    }
    let _ = count_tx.send(segments.len());

    for segment in segments {
        tokio::select! {
            biased;
            _ = done.cancelled() => return,
            sent = task_tx.send(segment) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

/// 任务队列：重试队列优先于规划队列
struct TaskQueue {
    inner: Mutex<(mpsc::Receiver<Segment>, mpsc::UnboundedReceiver<Segment>)>,
}

impl TaskQueue {
    fn new(tasks: mpsc::Receiver<Segment>, retries: mpsc::UnboundedReceiver<Segment>) -> Self {
        Self { inner: Mutex::new((tasks, retries)) }
    }

    async fn next(&self) -> Option<Segment> {
        let mut guard = self.inner.lock().await;
        let (tasks, retries) = &mut *guard;
        tokio::select! {
            biased;
            Some(segment) = retries.recv() => Some(segment),
            Some(segment) = tasks.recv() => Some(segment),
            else => None,
        }
    }
}

struct Worker {
    id: usize,
    url: String,
    client: Arc<dyn RangeClient>,
    queue: Arc<TaskQueue>,
    retry_tx: mpsc::UnboundedSender<Segment>,
    fatal_tx: mpsc::UnboundedSender<TransferError>,
    in_flight: Arc<Semaphore>,
    registry: Arc<CompletionRegistry>,
    progress: Arc<TransferProgress>,
    segment_sink: Option<ProgressFn>,
    policy: RetryPolicy,
    done: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            // done 同时覆盖了全局和调用方的取消
            let segment = tokio::select! {
                biased;
                segment = self.queue.next() => match segment {
                    Some(segment) => segment,
                    None => break,
                },
                _ = self.done.cancelled() => break,
            };
            self.handle(segment).await;
        }
        debug!("工作例程 {} 退出", self.id);
    }

    async fn handle(&self, mut segment: Segment) {
        if self.done.is_cancelled() {
            return;
        }
        if segment.completed {
            self.progress.record_existing(segment.len());
            self.registry.complete(segment);
            return;
        }

        let _permit = tokio::select! {
            biased;
            _ = self.done.cancelled() => return,
            permit = self.in_flight.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let fetched = fetch_segment(
            self.client.as_ref(),
            &self.url,
            &segment,
            self.segment_sink.clone(),
            &self.done,
        )
        .await;
        match fetched {
            Ok(bytes) => {
                segment.completed = true;
                self.progress.record_downloaded(bytes);
                self.registry.complete(segment);
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => self.retry(segment, e),
        }
    }

    /// 失败的分片放进无界重试队列，发送方永远不会被阻塞
    fn retry(&self, mut segment: Segment, e: TransferError) {
        let description = format!("分片 {} ({}-{}) 下载失败: {}", segment.index, segment.start, segment.end, e);
        match self.policy.on_failure(&mut segment, e) {
            RetryDecision::Retry(delay) => {
                warn!("{}, 第 {} 次重试", description, segment.retry_count);
                if delay.is_zero() {
                    let _ = self.retry_tx.send(segment);
                    return;
                }
                let retry_tx = self.retry_tx.clone();
                let done = self.done.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = done.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            let _ = retry_tx.send(segment);
                        }
                    }
                });
            }
            RetryDecision::Fatal(fatal) => {
                error!("{}", description);
                let _ = self.fatal_tx.send(fatal);
            }
        }
    }
}
