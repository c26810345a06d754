//! 进程级的传输上下文：全局取消信号 + 正在运行的传输登记表
//!
//! 进程启动时创建一个 `TransferContext`，以引用方式传给每一次传输；
//! 退出前调用 [`TransferContext::shutdown`]，它会触发全局取消并等待所有
//! 传输收尾。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::info;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{TransferError, TransferResult};

/// 一次正在运行的传输
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningTransfer {
    pub id: Uuid,
    pub url: String,
    pub output: PathBuf,
}

#[derive(Default)]
struct Inner {
    token: CancellationToken,
    running: Mutex<HashMap<Uuid, RunningTransfer>>,
    drained: Notify,
}

#[derive(Clone, Default)]
pub struct TransferContext {
    inner: Arc<Inner>,
}

impl TransferContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全局取消信号，每个传输都从它派生自己的取消信号
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// 只触发全局取消，不等待
    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    /// 当前正在运行的传输
    pub fn running(&self) -> Vec<RunningTransfer> {
        self.lock().values().cloned().collect()
    }

    /// 登记一个传输；返回的守卫被丢弃时自动注销
    pub fn register(&self, url: &str, output: &Path) -> TransferResult<TransferGuard> {
        if self.is_shutdown() {
            return Err(TransferError::Shutdown);
        }
        let id = Uuid::new_v4();
        self.lock().insert(
            id,
            RunningTransfer { id, url: url.to_string(), output: output.to_path_buf() },
        );
        Ok(TransferGuard { id, ctx: self.clone() })
    }

    /// 触发全局取消，并阻塞直到所有已登记的传输都结束
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        loop {
            // 先注册等待再检查，避免错过最后一次通知
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let remaining = self.lock().len();
            if remaining == 0 {
                break;
            }
            info!("等待 {} 个传输结束", remaining);
            notified.await;
        }
        info!("所有传输已结束");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, RunningTransfer>> {
        self.inner.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unregister(&self, id: &Uuid) {
        let empty = {
            let mut running = self.lock();
            running.remove(id);
            running.is_empty()
        };
        if empty {
            self.inner.drained.notify_waiters();
        }
    }
}

/// 传输登记守卫
pub struct TransferGuard {
    id: Uuid,
    ctx: TransferContext,
}

impl TransferGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.ctx.unregister(&self.id);
    }
}
