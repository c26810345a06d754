use chrono::Local; // 用于获取本地时间
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 日志文件默认的轮转大小
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

struct LogFile {
    writer: BufWriter<File>,
    current_size: u64,
}

/// 按大小轮转的文件日志，超过上限时把当前文件改名为 `<file>.backup`
pub struct FileLogger {
    file_path: PathBuf,
    level: LevelFilter,
    max_size: u64, // 最大文件大小 (bytes)
    file: Mutex<LogFile>,
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl FileLogger {
    pub fn new(file_path: impl Into<PathBuf>, level: LevelFilter, max_size: u64) -> std::io::Result<Self> {
        let file_path = file_path.into();
        // 确保日志目录存在
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = open_append(&file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file_path,
            level,
            max_size,
            file: Mutex::new(LogFile { writer: BufWriter::new(file), current_size }),
        })
    }

    /// 检查并执行日志轮转
    fn check_rotation(&self, file: &mut LogFile) -> std::io::Result<()> {
        if file.current_size <= self.max_size {
            return Ok(());
        }
        file.writer.flush()?;

        let mut backup = self.file_path.clone().into_os_string();
        backup.push(".backup");
        let backup = PathBuf::from(backup);
        if backup.exists() {
            std::fs::remove_file(&backup)?;
        }
        std::fs::rename(&self.file_path, &backup)?;

        file.writer = BufWriter::new(open_append(&self.file_path)?);
        file.current_size = 0;
        Ok(())
    }

    fn write_record(&self, record: &Record) -> std::io::Result<()> {
        let entry = format!(
            "{} [{}] {} - {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.target(),
            record.args()
        );
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        self.check_rotation(&mut file)?;
        file.writer.write_all(entry.as_bytes())?;
        file.current_size += entry.len() as u64;
        // 警告及以上立即落盘
        if record.level() <= log::Level::Warn {
            file.writer.flush()?;
        }
        Ok(())
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Err(e) = self.write_record(record) {
            eprintln!("日志写入失败: {}", e);
        }
    }

    fn flush(&self) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let _ = file.writer.flush();
    }
}

/// 初始化全局日志：给了日志文件就写文件，否则用 env_logger 输出到标准错误
pub fn init_logger(log_file: &str, level: LevelFilter) -> anyhow::Result<()> {
    if log_file.is_empty() {
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()?;
        return Ok(());
    }
    let logger = FileLogger::new(log_file, level, DEFAULT_MAX_LOG_SIZE)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}
