//! 日志模块 - 控制台日志和带大小限制的文件日志

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志文件路径，为空时只输出到控制台
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            file: None,
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 初始化日志系统
///
/// 返回的 guard 必须在程序结束前保持存活，否则文件日志可能丢失。
pub fn init(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        let _ = tracing_subscriber::registry().try_init();
        return None;
    }

    let mut env_filter =
        EnvFilter::from_default_env().add_directive(config.tracing_level().into());
    for directive in ["opendal=warn", "hyper=warn", "reqwest=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    // 控制台输出到 stderr，stdout 留给报告
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let mut guard = None;
    let file_layer = match config.file.as_deref() {
        Some(path) => match SizeRotatingWriter::new(path, config.max_size_mb) {
            Ok(writer) => {
                let (non_blocking, g) = tracing_appender::non_blocking(writer);
                guard = Some(g);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            Err(e) => {
                eprintln!("无法打开日志文件 {:?}: {}", path, e);
                None
            }
        },
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}

/// 带大小限制的日志写入器
///
/// 超过上限时把当前文件改名为 `*.old`（覆盖旧备份），然后重新打开。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: BufWriter<File>,
}

impl SizeRotatingWriter {
    pub fn new(file_path: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_max_bytes(file_path, u64::from(max_size_mb.max(1)) * 1024 * 1024)
    }

    fn with_max_bytes(file_path: &Path, max_size: u64) -> io::Result<Self> {
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // 启动时已经超限，先轮转
        let existing = fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);
        if existing > max_size {
            Self::rotate_file(file_path)?;
        }

        let file = Self::open(file_path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            file_path: file_path.to_path_buf(),
            max_size,
            written,
            writer: BufWriter::new(file),
        })
    }

    fn open(file_path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(file_path)
    }

    fn backup_path(file_path: &Path) -> PathBuf {
        let mut name = file_path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    fn rotate_file(file_path: &Path) -> io::Result<()> {
        let backup = Self::backup_path(file_path);
        if backup.exists() {
            fs::remove_file(&backup)?;
        }
        fs::rename(file_path, &backup)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        Self::rotate_file(&self.file_path)?;
        self.writer = BufWriter::new(Self::open(&self.file_path)?);
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
