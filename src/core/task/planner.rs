//! 分片规划：根据总大小、分片大小以及临时目录中的已有文件，计算仍需下载的区间

use std::path::Path;

use log::{debug, warn};
use tokio::fs;

use super::segment::{parse_temp_name, Segment};
use crate::core::error::{TransferError, TransferResult};

/// 规划覆盖 `[resume_offset, total - 1]` 的有序分片序列。
///
/// 临时目录中大小正确的分片文件视为已完成；大小不符、位于 `resume_offset`
/// 之前（已经合并过）、超出总长度或与其他分片重叠的文件会被删除，
/// 其区间重新规划为新的分片。
pub async fn plan_segments(
    total: u64,
    chunk_size: u64,
    temp_dir: &Path,
    resume_offset: u64,
) -> TransferResult<Vec<Segment>> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidConfig("分片大小必须大于0".to_string()));
    }
    if resume_offset > total {
        return Err(TransferError::OutputTooLarge { local: resume_offset, remote: total });
    }

    let mut completed = scan_completed(total, temp_dir, resume_offset).await?;
    completed.sort_by_key(|s| s.start);

    let mut segments = Vec::new();
    let mut cursor = resume_offset;
    for mut seg in completed {
        if seg.start < cursor {
            // 与前一个分片重叠，通常是换了分片大小后残留的文件
            warn!("删除重叠的分片文件: {}", seg.temp_file.display());
            let _ = fs::remove_file(&seg.temp_file).await;
            continue;
        }
        if seg.start > cursor {
            push_range(&mut segments, cursor, seg.start - 1, chunk_size, temp_dir);
        }
        cursor = seg.end + 1;
        seg.index = segments.len();
        segments.push(seg);
    }
    if cursor < total {
        push_range(&mut segments, cursor, total - 1, chunk_size, temp_dir);
    }

    debug!(
        "规划完成: 共 {} 个分片, 其中 {} 个已完成",
        segments.len(),
        segments.iter().filter(|s| s.completed).count()
    );
    Ok(segments)
}

async fn scan_completed(
    total: u64,
    temp_dir: &Path,
    resume_offset: u64,
) -> TransferResult<Vec<Segment>> {
    let mut entries = fs::read_dir(temp_dir).await.map_err(|source| TransferError::TempDir {
        path: temp_dir.to_path_buf(),
        source,
    })?;

    let mut completed = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(source) => {
                return Err(TransferError::TempDir { path: temp_dir.to_path_buf(), source })
            }
        };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((start, end)) = parse_temp_name(&name) else {
            let _ = fs::remove_file(&path).await;
            continue;
        };
        let size = entry.metadata().await?.len();
        let valid = size == end - start + 1 && start >= resume_offset && end < total;
        if !valid {
            debug!("删除无效的分片文件: {} ({} 字节)", name, size);
            let _ = fs::remove_file(&path).await;
            continue;
        }
        completed.push(Segment {
            index: 0,
            start,
            end,
            temp_file: path,
            completed: true,
            retry_count: 0,
        });
    }
    Ok(completed)
}

/// 把 `[start, max_end]` 切成若干 `chunk_size` 大小的分片，最后一片可能更短
fn push_range(segments: &mut Vec<Segment>, start: u64, max_end: u64, chunk_size: u64, temp_dir: &Path) {
    let mut start = start;
    while start <= max_end {
        let end = start.saturating_add(chunk_size - 1).min(max_end);
        segments.push(Segment::new(segments.len(), start, end, temp_dir));
        start = end + 1;
    }
}
