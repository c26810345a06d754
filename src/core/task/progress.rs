use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, info};

/// 一次进度回调携带的数据
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub file_name: String,
    /// 已处理字节数
    pub operated: u64,
    pub total: u64,
    pub percent: f64,
    /// KB/s
    pub speed: f64,
    pub done: bool,
}

/// 进度回调
pub type ProgressFn = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// 计算速度（KB/s）；耗时为 0 时直接返回 KB 数，避免除零
pub fn speed_kbs(bytes: u64, elapsed_secs: f64) -> f64 {
    let kb = bytes as f64 / 1024.0;
    if elapsed_secs > 0.0 {
        kb / elapsed_secs
    } else {
        kb
    }
}

pub fn percent(operated: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    operated as f64 / total as f64 * 100.0
}

fn log_progress(prefix: &str, event: &ProgressEvent, must_log: bool, elapsed: f64) {
    let msg = format!(
        "{} {}: {:.2}% ({}/{} bytes, {:.2} KB/s)",
        prefix, event.file_name, event.percent, event.operated, event.total, event.speed
    );
    if must_log {
        info!("{}", msg);
    } else {
        debug!("{}", msg);
    }
    if event.operated == event.total && must_log {
        info!(
            "{} {}: {:.2}% ({}/{} bytes, {:.2} KB/s), cost {:.2} s",
            prefix,
            event.file_name,
            event.percent,
            event.operated,
            event.total,
            speed_kbs(event.operated, elapsed),
            elapsed
        );
    }
}

#[derive(Debug, Default)]
struct Counters {
    downloaded: u64,
    this_downloaded: u64,
}

/// 传输级进度：按整个分片的粒度累计
pub struct TransferProgress {
    file_name: String,
    total: u64,
    start: Instant,
    counters: Mutex<Counters>,
    sink: Option<ProgressFn>,
}

impl TransferProgress {
    pub fn new(file_name: impl Into<String>, total: u64, sink: Option<ProgressFn>) -> Self {
        Self {
            file_name: file_name.into(),
            total,
            start: Instant::now(),
            counters: Mutex::new(Counters::default()),
            sink,
        }
    }

    /// 本次实际下载的字节，同时计入速度
    pub fn record_downloaded(&self, bytes: u64) {
        self.update(bytes, true);
    }

    /// 之前已经存在的字节（已完成的分片、已合并的前缀），不计入速度
    pub fn record_existing(&self, bytes: u64) {
        self.update(bytes, false);
    }

    pub fn downloaded(&self) -> u64 {
        self.lock().downloaded
    }

    /// 本次运行实际从网络获取的字节数
    pub fn fetched(&self) -> u64 {
        self.lock().this_downloaded
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // 计数器里只有整数，锁中毒时数据依旧可用
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, bytes: u64, this_operation: bool) {
        let mut counters = self.lock();
        counters.downloaded += bytes;
        if this_operation {
            counters.this_downloaded += bytes;
        }
        let elapsed = self.start.elapsed().as_secs_f64();
        let event = ProgressEvent {
            file_name: self.file_name.clone(),
            operated: counters.downloaded,
            total: self.total,
            percent: percent(counters.downloaded, self.total),
            speed: speed_kbs(counters.this_downloaded, elapsed),
            done: counters.downloaded >= self.total,
        };
        log_progress("downloading", &event, true, elapsed);
        // 持锁回调，保证调用方看到的进度单调递增
        if let Some(sink) = &self.sink {
            sink(&event);
        }
    }
}

/// 分片级进度：响应体每读到一块数据就上报一次
pub struct SegmentProgress {
    file_name: String,
    total: u64,
    downloaded: u64,
    start: Instant,
    sink: Option<ProgressFn>,
}

impl SegmentProgress {
    pub fn new(file_name: impl Into<String>, total: u64, sink: Option<ProgressFn>) -> Self {
        Self {
            file_name: file_name.into(),
            total,
            downloaded: 0,
            start: Instant::now(),
            sink,
        }
    }

    pub fn advance(&mut self, bytes: u64) {
        self.downloaded += bytes;
        let elapsed = self.start.elapsed().as_secs_f64();
        let event = ProgressEvent {
            file_name: self.file_name.clone(),
            operated: self.downloaded,
            total: self.total,
            percent: percent(self.downloaded, self.total),
            speed: speed_kbs(self.downloaded, elapsed),
            done: self.downloaded >= self.total,
        };
        log_progress("downloading", &event, false, elapsed);
        if let Some(sink) = &self.sink {
            sink(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> (ProgressFn, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink: ProgressFn = Arc::new(move |e: &ProgressEvent| sink_events.lock().unwrap().push(e.clone()));
        (sink, events)
    }

    #[test]
    fn test_speed_without_elapsed_time() {
        assert_eq!(speed_kbs(2048, 0.0), 2.0);
        assert_eq!(speed_kbs(2048, 2.0), 1.0);
    }

    #[test]
    fn test_transfer_progress_percent_and_done() {
        let (sink, events) = capture();
        let progress = TransferProgress::new("out.bin", 100, Some(sink));

        progress.record_existing(40);
        progress.record_downloaded(60);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operated, 40);
        assert_eq!(events[0].percent, 40.0);
        assert!(!events[0].done);
        assert_eq!(events[1].operated, 100);
        assert!(events[1].done);
        assert_eq!(events[1].file_name, "out.bin");
        assert_eq!(progress.downloaded(), 100);
    }

    #[test]
    fn test_existing_bytes_do_not_count_as_speed() {
        let (sink, events) = capture();
        let progress = TransferProgress::new("out.bin", 4096, Some(sink));
        progress.record_existing(4096);
        assert_eq!(events.lock().unwrap()[0].speed, 0.0);
    }

    #[test]
    fn test_segment_progress_reports_every_read() {
        let (sink, events) = capture();
        let mut progress = SegmentProgress::new("temp-0-9", 10, Some(sink));
        progress.advance(3);
        progress.advance(3);
        progress.advance(4);

        let events = events.lock().unwrap();
        let operated: Vec<u64> = events.iter().map(|e| e.operated).collect();
        assert_eq!(operated, vec![3, 6, 10]);
        assert!(events[2].done);
    }
}
