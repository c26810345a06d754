use std::time::Duration;

use super::segment::Segment;
use crate::core::error::TransferError;

/// 分片重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub jitter_factor: f64, // 抖动因子，避免所有分片同时重试
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            jitter_factor: 0.1,
        }
    }
}

/// 一次失败之后的处理结果
#[derive(Debug)]
pub enum RetryDecision {
    /// 重新入队，延迟后再试
    Retry(Duration),
    /// 上报为整个传输的致命错误
    Fatal(TransferError),
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// 判断失败的分片是否还能重试；能重试时会累加 `retry_count`
    pub fn on_failure(&self, segment: &mut Segment, error: TransferError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Fatal(error);
        }
        if segment.retry_count < self.max_retries {
            segment.retry_count += 1;
            return RetryDecision::Retry(self.delay());
        }
        RetryDecision::Fatal(TransferError::MaxRetriesExceeded {
            index: segment.index,
            start: segment.start,
            end: segment.end,
            attempts: segment.retry_count + 1,
            source: Box::new(error),
        })
    }

    pub fn delay(&self) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let secs = self.base_delay.as_secs_f64();
        let jitter = secs * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_secs_f64((secs + jitter).max(0.0))
    }
}
