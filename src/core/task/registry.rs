use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::segment::Segment;

/// 完成登记表：按序号保存已完成、尚未合并的分片
///
/// 分片完成的先后顺序是任意的，合并器按序号从小到大依次取出。
#[derive(Default)]
pub struct CompletionRegistry {
    ready: Mutex<BTreeMap<usize, Segment>>,
    notify: Notify,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个已完成的分片，同一序号只保留一条
    pub fn complete(&self, segment: Segment) {
        {
            let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
            ready.insert(segment.index, segment);
        }
        // 只有合并器一个等待者，notify_one 在没人等待时会保留一个许可
        self.notify.notify_one();
    }

    pub fn try_take(&self, index: usize) -> Option<Segment> {
        self.ready.lock().unwrap_or_else(|e| e.into_inner()).remove(&index)
    }

    pub fn pending(&self) -> usize {
        self.ready.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 等待序号为 `index` 的分片；`stop` 被触发时返回 None
    pub async fn take(&self, index: usize, stop: &CancellationToken) -> Option<Segment> {
        loop {
            if stop.is_cancelled() {
                return None;
            }
            if let Some(segment) = self.try_take(index) {
                return Some(segment);
            }
            tokio::select! {
                biased;
                _ = stop.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }
}
