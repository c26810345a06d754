//! CLI: 命令行接口和参数解析模块
//!
//! ## 支持的命令
//!
//! - 基本下载：`chunkdown <url>`
//! - 批量下载：`chunkdown -f urls.txt`
//! - 编辑配置：`chunkdown -e`
//! - 指定配置：`chunkdown -c config.conf <url>`
//! - 调整分片：`chunkdown -t 8 -s 4194304 <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/chunkdown/chunkdown.conf`
//! - macOS: `~/Library/Application Support/chunkdown/chunkdown.conf`
//! - Linux: `~/.config/chunkdown/chunkdown.conf`

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::env;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::utils::validator::is_valid_url;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/chunkdown/chunkdown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/chunkdown/chunkdown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/chunkdown/chunkdown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 xdg-open，否则 nano
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// chunkdown 命令行参数
///
/// 示例用法：
///   chunkdown https://example.com/file.zip
///   chunkdown -e  # 编辑配置文件
///   chunkdown -t 8 -d /data https://example.com/file.zip
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkdown",
    version = env!("CARGO_PKG_VERSION"),
    about = "分片并发、可断点续传的 HTTP 文件下载器",
    long_about = "把文件按固定大小切成分片并发下载，中断后再次运行会从已下载的分片继续。\n\n示例：\n  chunkdown https://example.com/file.zip\n  chunkdown -e\n  chunkdown -f urls.txt -d /data\n  chunkdown -t 8 -s 4194304 https://example.com/file.zip\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    #[arg(long, short = 'd', help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    #[arg(long, short = 'n', help = "指定下载文件名，覆盖URL自动推断（只对第一个URL生效）。")]
    pub file_name: Option<String>,

    #[arg(long = "threads", short = 't', help = "每个文件的工作例程数。")]
    pub concurrency: Option<usize>,

    #[arg(long, short = 's', help = "分片大小（字节）。")]
    pub chunk_size: Option<u64>,

    #[arg(long, short = 'r', help = "单个分片的最大重试次数。")]
    pub max_retry: Option<u32>,

    #[arg(long, help = "临时分片目录。")]
    pub temp_dir: Option<String>,

    #[arg(long, help = "删除已存在的文件和临时分片，从头下载。")]
    pub overwrite: bool,
}

impl Args {
    /// 解析命令行参数，加载（或创建）配置文件并合并
    pub fn parse_args() -> Result<(Self, Config)> {
        let args = Args::parse();

        if args.edit_config {
            if !Path::new(&args.config).exists() {
                Config::default().save_with_tutorial(&args.config)?;
            }
            open_config_in_editor(&args.config);
            std::process::exit(0);
        }

        let config = args.load_config()?;
        Ok((args, config))
    }

    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        config.validate().context("配置无效")?;
        Ok(config)
    }

    /// 汇总命令行和URL文件中的URL
    pub fn get_urls(&self) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            if !Path::new(file_path).exists() {
                bail!("URL文件不存在: {}", file_path);
            }
            let content = fs::read_to_string(file_path).with_context(|| format!("无法读取URL文件: {}", file_path))?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        for url in &urls {
            if !is_valid_url(url) {
                bail!("无效的URL: {}", url);
            }
        }

        if urls.is_empty() {
            bail!("未提供任何URL。请通过命令行参数或文件提供至少一个URL。");
        }

        Ok(urls)
    }
}
