use std::path::{Path, PathBuf};

use regex::Regex;

/// 临时分片文件名前缀
pub const TEMP_PREFIX: &str = "temp";

/// 下载分片：远程资源中一段连续的字节区间，`start`/`end` 均为闭区间
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub temp_file: PathBuf,
    pub completed: bool,
    pub retry_count: u32,
}

impl Segment {
    pub fn new(index: usize, start: u64, end: u64, temp_dir: &Path) -> Self {
        Self {
            index,
            start,
            end,
            temp_file: temp_file_path(temp_dir, start, end),
            completed: false,
            retry_count: 0,
        }
    }

    /// 分片字节数
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn range_header(&self) -> String {
        range_header(self.start, self.end)
    }
}

/// `Range` 请求头的值，闭区间
pub fn range_header(start: u64, end: u64) -> String {
    format!("bytes={}-{}", start, end)
}

/// `<temp_dir>/temp-<start>-<end>`
pub fn temp_file_path(temp_dir: &Path, start: u64, end: u64) -> PathBuf {
    temp_dir.join(format!("{}-{}-{}", TEMP_PREFIX, start, end))
}

/// 从临时文件名中解析出字节区间，名字不合法或 `end < start` 时返回 None
pub fn parse_temp_name(name: &str) -> Option<(u64, u64)> {
    let re = Regex::new(r"^temp-(\d+)-(\d+)$").ok()?;
    let caps = re.captures(name)?;
    let start = caps[1].parse::<u64>().ok()?;
    let end = caps[2].parse::<u64>().ok()?;
    if end < start {
        return None;
    }
    Some((start, end))
}
