use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::progress::{ProgressFn, SegmentProgress};
use super::segment::{range_header, Segment};
use crate::core::error::{TransferError, TransferResult};

/// 响应体字节流
pub type ByteStream = BoxStream<'static, TransferResult<Bytes>>;

/// 引擎对 HTTP 客户端的全部要求：探测长度 + 带 `Range` 的 GET
#[async_trait]
pub trait RangeClient: Send + Sync {
    /// 通过 HEAD 请求获取远程资源长度，长度缺失或为 0 时报错
    async fn content_length(&self, url: &str) -> TransferResult<u64>;

    /// 请求 `[start, end]` 区间，非成功状态码返回 `HttpStatus`
    async fn get_range(&self, url: &str, start: u64, end: u64) -> TransferResult<ByteStream>;
}

/// 基于 reqwest 的默认实现
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// `timeout` 同时作为连接超时和读取超时，响应体停滞超过该时间即视为网络错误
    pub fn new(user_agent: &str, timeout: Duration) -> TransferResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RangeClient for ReqwestClient {
    async fn content_length(&self, url: &str) -> TransferResult<u64> {
        let resp = self.client.head(url).send().await?;
        if !resp.status().is_success() {
            return Err(TransferError::HttpStatus {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        // HEAD 响应没有响应体，直接读头部而不是 content_length()
        parse_content_length(resp.headers(), url)
    }

    async fn get_range(&self, url: &str, start: u64, end: u64) -> TransferResult<ByteStream> {
        let resp = self
            .client
            .get(url)
            .header(header::RANGE, range_header(start, end))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TransferError::HttpStatus {
                status: resp.status().as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp.bytes_stream().map(|r| r.map_err(TransferError::from)).boxed())
    }
}

fn parse_content_length(headers: &header::HeaderMap, url: &str) -> TransferResult<u64> {
    let length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| TransferError::ContentLengthMissing(url.to_string()))?;
    if length == 0 {
        return Err(TransferError::BadContentLength(length));
    }
    Ok(length)
}

/// 下载一个分片到它自己的临时文件，返回写入的字节数。
///
/// 临时文件每次都会被截断重写；失败时不删除文件，下次规划时会因为大小
/// 不符被清理。
pub async fn fetch_segment(
    client: &dyn RangeClient,
    url: &str,
    segment: &Segment,
    sink: Option<ProgressFn>,
    cancel: &CancellationToken,
) -> TransferResult<u64> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&segment.temp_file)
        .await?;

    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        resp = client.get_range(url, segment.start, segment.end) => resp?,
    };

    let expected = segment.len();
    let name = segment.temp_file.to_string_lossy().to_string();
    let mut progress = SegmentProgress::new(name, expected, sink);
    let mut written = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        let len = chunk.len() as u64;
        if written + len > expected {
            // 服务器忽略了 Range 头，直接放弃，不把整个文件写进分片
            return Err(TransferError::SizeMismatch { expected, actual: written + len });
        }
        file.write_all(&chunk).await?;
        written += len;
        progress.advance(len);
    }
    file.flush().await?;

    if written != expected {
        return Err(TransferError::SizeMismatch { expected, actual: written });
    }
    Ok(written)
}
