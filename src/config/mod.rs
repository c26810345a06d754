use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::TransferOptions;
use crate::utils::validator::{validate_chunk_size, validate_concurrency, validate_max_retry, validate_output_path};

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 临时分片的根目录，每个输出文件在其中有自己的子目录
    pub temp_dir: String,
    /// 每个下载任务的工作例程数
    pub concurrency: usize,
    /// 同时进行中的分片请求上限
    pub max_in_flight: usize,
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 单个分片的最大重试次数
    pub max_retry: u32,
    /// 重试延迟（毫秒），0 表示立即重试
    pub retry_delay_ms: u64,
    /// 连接/读取超时时间（秒）
    pub timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 日志文件，为空时输出到标准错误
    pub log_file: String,
    /// 日志级别：error / warn / info / debug / trace
    pub log_level: String,
    /// 是否覆盖已存在的文件
    pub overwrite: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            temp_dir: "./download_tmp".to_string(),
            concurrency: 4,
            max_in_flight: 50,
            chunk_size: 10 * 1024 * 1024,
            max_retry: 3,
            retry_delay_ms: 500,
            timeout: 30,
            user_agent: concat!("chunkdown/", env!("CARGO_PKG_VERSION")).to_string(),
            log_file: String::new(),
            log_level: "info".to_string(),
            overwrite: false,
        }
    }
}

impl Config {
    /// 加载配置文件，不存在或格式错误时写入默认配置
    pub fn load(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).with_context(|| format!("无法读取配置文件: {}", path))?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    eprintln!("配置文件格式错误: {}，将使用默认配置", e);
                    let config = Config::default();
                    config.save_with_tutorial(path)?;
                    Ok(config)
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("无法创建配置目录: {}", parent.display()))?;
        }
        let config_content = toml::to_string_pretty(self).context("无法序列化配置")?;
        let full_content = format!("{}\n\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content).with_context(|| format!("无法保存配置文件: {}", path))?;
        Ok(())
    }

    fn generate_tutorial_content() -> String {
        r#"# chunkdown 配置文件
# ====================
#
# 这是一个 TOML 格式的配置文件，用于配置 chunkdown 分片下载器的行为。
#
# 配置文件位置：
# - Windows: %APPDATA%/chunkdown/chunkdown.conf
# - macOS: ~/Library/Application Support/chunkdown/chunkdown.conf
# - Linux: ~/.config/chunkdown/chunkdown.conf
#
# 命令行参数会覆盖配置文件中的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   chunkdown https://example.com/file.zip                  # 使用默认配置
#   chunkdown -t 8 https://example.com/file.zip             # 使用8个工作例程
#   chunkdown -s 4194304 https://example.com/file.zip       # 4MB 分片
#   chunkdown -d /path/to/downloads https://example.com/file.zip
#   chunkdown -f urls.txt                                   # 批量下载
#   chunkdown -e                                            # 编辑配置文件

# ==================== 下载设置 ====================
#
# download_dir    默认下载目录，支持相对路径和绝对路径
# temp_dir        临时分片目录；中断后再次下载同一个文件会从这里续传
# concurrency     每个文件的工作例程数，建议 2-16
# max_in_flight   同时进行中的分片请求上限
# chunk_size      分片大小（字节），默认 10MB
# overwrite       为 true 时删除已存在的文件和临时分片，从头下载

# ==================== 网络设置 ====================
#
# timeout         连接/读取超时时间（秒）
# user_agent      某些服务器可能需要特定的 User-Agent

# ==================== 重试设置 ====================
#
# max_retry       单个分片的最大重试次数，超过后整个下载失败
# retry_delay_ms  重试前的等待时间（毫秒），会附加 ±10% 的随机抖动

# ==================== 日志设置 ====================
#
# log_file        日志文件路径，为空时输出到终端（标准错误）
# log_level       error / warn / info / debug / trace

# ==================== 故障排除 ====================
#
# 问题：下载速度很慢
# 解决：增加 concurrency，或调小 chunk_size 让更多分片并行
#
# 问题：经常下载失败
# 解决：增加 max_retry 或 timeout
#
# 问题：下载中断后想从头开始
# 解决：使用 --overwrite 或设置 overwrite = true

# ==================== 配置项 ====================
"#
        .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<()> {
        validate_concurrency(self.concurrency)?;
        validate_chunk_size(self.chunk_size)?;
        validate_max_retry(self.max_retry)?;
        validate_output_path(&self.download_dir)?;
        if self.max_in_flight == 0 {
            bail!("同时请求数上限必须大于0");
        }
        if self.timeout == 0 {
            bail!("超时时间必须大于0");
        }
        if self.temp_dir.is_empty() {
            bail!("临时目录不能为空");
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            bail!("无效的日志级别: {}", self.log_level);
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(dir) = &args.temp_dir {
            self.temp_dir = dir.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(chunk_size) = args.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(max_retry) = args.max_retry {
            self.max_retry = max_retry;
        }
        if args.overwrite {
            self.overwrite = true;
        }
    }

    /// 转换为下载引擎的参数
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            concurrency: self.concurrency,
            max_in_flight: self.max_in_flight,
            chunk_size: self.chunk_size,
            max_retry: self.max_retry,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            temp_root: PathBuf::from(&self.temp_dir),
            overwrite: self.overwrite,
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 临时目录: {}\n\
            - 工作例程数: {}\n\
            - 同时请求上限: {}\n\
            - 分片大小: {} 字节\n\
            - 重试次数: {}\n\
            - 超时时间: {} 秒\n\
            - 覆盖已有文件: {}",
            self.download_dir,
            self.temp_dir,
            self.concurrency,
            self.max_in_flight,
            self.chunk_size,
            self.max_retry,
            self.timeout,
            if self.overwrite { "是" } else { "否" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_in_flight, 50);
        assert_eq!(config.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.max_retry, 3);
        assert_eq!(config.temp_dir, "./download_tmp");
        assert!(!config.overwrite);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.max_retry = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/chunkdown.conf");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.concurrency = 9;
        config.save_with_tutorial(path).expect("保存带教程的配置失败");
        let loaded = Config::load(path).expect("加载配置失败");
        assert_eq!(loaded, config);

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("chunkdown 配置文件"));
        assert!(content.contains("故障排除"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.conf");
        std::fs::write(&path, "concurrency = 2\n").unwrap();
        let loaded = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.concurrency, 2);
        assert_eq!(loaded.chunk_size, Config::default().chunk_size);
    }

    #[test]
    fn test_transfer_options() {
        let mut config = Config::default();
        config.retry_delay_ms = 0;
        config.overwrite = true;
        let options = config.transfer_options();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.retry_delay, Duration::ZERO);
        assert_eq!(options.temp_root, PathBuf::from("./download_tmp"));
        assert!(options.overwrite);
    }

    #[test]
    fn test_config_summary() {
        let summary = Config::default().get_summary();
        assert!(summary.contains("配置摘要"));
        assert!(summary.contains("下载目录"));
        assert!(summary.contains("工作例程数"));
    }
}
