#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chunkdown::core::task::{ByteStream, RangeClient};
use chunkdown::core::{TransferError, TransferOptions, TransferResult};
use futures::StreamExt;

pub const URL: &str = "http://mem.test/files/data.bin";

/// 内存中的远程资源，可以按分片起点注入延迟和失败
#[derive(Default)]
pub struct MemoryClient {
    data: Vec<u8>,
    delays: HashMap<u64, Duration>,
    /// 分片起点 -> 剩余失败次数
    failures: Mutex<HashMap<u64, usize>>,
    requests: Mutex<Vec<(u64, u64)>>,
    head_calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    body_chunk: usize,
    /// 模拟 HEAD 响应缺少 Content-Length
    no_length: bool,
}

impl MemoryClient {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, body_chunk: 4096, ..Default::default() }
    }

    pub fn with_delay(mut self, start: u64, delay: Duration) -> Self {
        self.delays.insert(start, delay);
        self
    }

    pub fn failing(self, start: u64, times: usize) -> Self {
        self.failures.lock().unwrap().insert(start, times);
        self
    }

    pub fn without_length(mut self) -> Self {
        self.no_length = true;
        self
    }

    pub fn requests(&self) -> Vec<(u64, u64)> {
        let mut requests = self.requests.lock().unwrap().clone();
        requests.sort();
        requests
    }

    pub fn requests_for(&self, start: u64) -> usize {
        self.requests.lock().unwrap().iter().filter(|(s, _)| *s == start).count()
    }

    pub fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    /// 同时处于请求中的最大数量
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RangeClient for MemoryClient {
    async fn content_length(&self, url: &str) -> TransferResult<u64> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        if self.no_length {
            return Err(TransferError::ContentLengthMissing(url.to_string()));
        }
        match self.data.len() as u64 {
            0 => Err(TransferError::BadContentLength(0)),
            len => Ok(len),
        }
    }

    async fn get_range(&self, url: &str, start: u64, end: u64) -> TransferResult<ByteStream> {
        self.requests.lock().unwrap().push((start, end));

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&start) {
            tokio::time::sleep(*delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&start) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransferError::HttpStatus { status: 503, url: url.to_string() });
                }
            }
        }

        let body = self.data[start as usize..=end as usize].to_vec();
        let chunks: Vec<TransferResult<Bytes>> = body
            .chunks(self.body_chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }
}

pub fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn options(temp_root: &Path, concurrency: usize, chunk_size: u64) -> TransferOptions {
    TransferOptions {
        concurrency,
        chunk_size,
        retry_delay: Duration::ZERO,
        temp_root: temp_root.to_path_buf(),
        ..Default::default()
    }
}

/// 临时目录中剩余的分片文件名
pub fn temp_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn temp_dir(temp_root: &Path, output: &Path) -> PathBuf {
    chunkdown::utils::path::temp_dir_for(temp_root, output).unwrap()
}
