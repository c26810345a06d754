use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::core::task::{ProgressEvent, ProgressFn};

const BAR_TEMPLATE: &str = "{msg:30!} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {prefix}";

// 结构体：ProgressManager
// 每个下载任务一个进度条，共用一个 MultiProgress 绘制
pub struct ProgressManager {
    multi: MultiProgress,
    style: ProgressStyle,
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressManager {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        ProgressManager { multi: MultiProgress::new(), style }
    }

    /// 不绘制任何内容，测试和非终端环境使用
    pub fn hidden() -> Self {
        let manager = Self::new();
        manager.multi.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        manager
    }

    /// 新增一个进度条，总长度在第一次进度回调时确定
    pub fn add_progress_bar(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(self.style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(200));
        pb
    }

    /// 把进度条包装成下载引擎的进度回调
    pub fn callback(pb: &ProgressBar) -> ProgressFn {
        let pb = pb.clone();
        std::sync::Arc::new(move |event: &ProgressEvent| update_progress(&pb, event))
    }
}

/// 根据一次进度事件刷新进度条
pub fn update_progress(pb: &ProgressBar, event: &ProgressEvent) {
    if event.total > 0 && pb.length() != Some(event.total) {
        pb.set_length(event.total);
    }
    pb.set_position(event.operated);

    let speed = event.speed;
    let speed_str = if speed > 1024.0 {
        format!("{:.2} MB/s", speed / 1024.0)
    } else {
        format!("{:.2} KB/s", speed)
    };

    // 计算剩余时间
    let eta = if speed > 0.0 && event.total > event.operated {
        let seconds = ((event.total - event.operated) as f64 / 1024.0 / speed) as u64;
        if seconds > 3600 {
            format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
        } else if seconds > 60 {
            format!("{}m{}s", seconds / 60, seconds % 60)
        } else {
            format!("{}s", seconds)
        }
    } else {
        "未知".to_string()
    };

    pb.set_prefix(format!("{:.0}% | {} | ETA:{}", event.percent, speed_str, eta));
}
