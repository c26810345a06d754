use chunkdown::cli;
use chunkdown::core::{ChunkedTransfer, TransferContext, TransferError, TransferReport};
use chunkdown::core::task::{OutputTarget, RangeClient, ReqwestClient};
use chunkdown::ui::{print_error, print_success, DownloadSummary, ProgressManager};
use chunkdown::utils::logger::init_logger;
use chunkdown::utils::path::resolve_output_path;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal,
};
use log::{error, info, warn, LevelFilter};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const KEYBOARD_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 当前正在下载的任务的取消信号
type CurrentTransfer = Arc<Mutex<Option<CancellationToken>>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 解析参数和配置
    let (args, config) = match cli::Args::parse_args() {
        Ok((args, config)) => (args, config),
        Err(e) => {
            eprintln!("参数解析失败: {:#}", e);
            std::process::exit(1);
        }
    };

    let level = config.log_level.parse().unwrap_or(LevelFilter::Info);
    init_logger(&config.log_file, level)?;
    info!(
        "chunkdown {} 启动 (commit {}, 构建于 {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    );

    // 获取下载URL列表
    let urls = match args.get_urls() {
        Ok(urls) => urls,
        Err(e) => {
            error!("获取URL列表失败: {:#}", e);
            eprintln!("获取URL列表失败: {:#}", e);
            std::process::exit(1);
        }
    };
    info!("解析到的URLs: {:?}", urls);
    info!("配置文件路径: {}", args.config);
    println!("{}", config.get_summary());

    let ctx = TransferContext::new();
    let client: Arc<dyn RangeClient> = Arc::new(ReqwestClient::new(
        &config.user_agent,
        Duration::from_secs(config.timeout),
    )?);
    let current: CurrentTransfer = Arc::new(Mutex::new(None));

    // 非终端环境下只能靠信号退出
    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到 Ctrl-C, 正在退出");
                ctx.cancel();
            }
        }
    });

    println!("\n开始下载... (按 'c' 取消当前文件, 'q' 退出)");
    let keys = KeyListener::start(ctx.clone(), current.clone());

    let start = Instant::now();
    let progress = ProgressManager::new();
    let mut results = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        if ctx.is_shutdown() {
            results.push((url.clone(), Err(TransferError::Shutdown)));
            continue;
        }
        // -n 只对第一个URL生效
        let file_name = if i == 0 { args.file_name.as_deref() } else { None };
        let output = resolve_output_path(file_name, Path::new(&config.download_dir), url);
        let label = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.clone());

        let pb = progress.add_progress_bar(&label);
        let token = CancellationToken::new();
        set_current(&current, Some(token.clone()));
        let result = ChunkedTransfer::new(url.clone(), client.clone(), OutputTarget::File(output))
            .with_options(config.transfer_options())
            .on_progress(ProgressManager::callback(&pb))
            .run(&ctx, Some(token))
            .await;
        set_current(&current, None);

        match &result {
            Ok(_) => pb.finish_with_message(label),
            Err(e) if e.is_cancelled() => pb.abandon_with_message(format!("{} (已取消)", label)),
            Err(_) => pb.abandon_with_message(format!("{} (失败)", label)),
        }
        results.push((url.clone(), result));
    }

    keys.stop().await;
    ctx.shutdown().await;

    let summary = summarize(&results, start.elapsed());
    for (url, result) in &results {
        match result {
            Ok(report) => print_success(&format!("{} -> {}", url, report.output.display())),
            Err(e) => print_error(&format!("{}: {}", url, e)),
        }
    }
    println!("{}", summary);
    info!(
        "下载结束 - 成功: {}, 失败: {}, 取消: {}",
        summary.success_count, summary.failed_count, summary.cancelled_count
    );

    if summary.failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn set_current(current: &CurrentTransfer, token: Option<CancellationToken>) {
    *current.lock().unwrap_or_else(|e| e.into_inner()) = token;
}

fn summarize(results: &[(String, Result<TransferReport, TransferError>)], elapsed: Duration) -> DownloadSummary {
    let mut summary = DownloadSummary {
        total_files: results.len(),
        total_size: 0,
        elapsed_time: elapsed,
        success_count: 0,
        failed_count: 0,
        cancelled_count: 0,
    };
    for (_, result) in results {
        match result {
            Ok(report) => {
                summary.success_count += 1;
                summary.total_size += report.fetched_bytes;
            }
            Err(e) if e.is_cancelled() => summary.cancelled_count += 1,
            Err(_) => summary.failed_count += 1,
        }
    }
    summary
}

/// 终端按键监听：`q` 或 Ctrl-C 退出全部下载，`c` 取消当前文件
struct KeyListener {
    stop: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl KeyListener {
    fn start(ctx: TransferContext, current: CurrentTransfer) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        if !std::io::stdin().is_terminal() || terminal::enable_raw_mode().is_err() {
            return Self { stop, handle: None };
        }

        let flag = stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::Relaxed) {
                match event::poll(KEYBOARD_POLL_INTERVAL) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => break,
                }
                let Ok(Event::Key(key)) = event::read() else {
                    continue;
                };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    // raw 模式下 Ctrl-C 不会产生信号
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        warn!("收到 Ctrl-C, 正在退出");
                        ctx.cancel();
                    }
                    KeyCode::Char('q') | KeyCode::Char('Q') => {
                        info!("用户主动退出下载");
                        ctx.cancel();
                    }
                    KeyCode::Char('c') | KeyCode::Char('C') => {
                        if let Some(token) = current.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                            info!("用户取消当前下载");
                            token.cancel();
                        }
                    }
                    _ => {}
                }
            }
        });
        Self { stop, handle: Some(handle) }
    }

    async fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle {
            let _ = handle.await;
            // 恢复终端
            let _ = terminal::disable_raw_mode();
        }
    }
}
