use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tarsync::config::{default_concurrency, AppConfig, RepositoryConfig, RunConfig};
use tarsync::core::{SyncEngine, TarArchiver};
use tarsync::logging;
use tarsync::storage::{create_repository, LocalStorage};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 把本地目录按条目打包成 tar 并同步到对象仓库
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 本地源目录
    #[arg(long)]
    src: PathBuf,

    /// 扫描深度，每个该深度的条目对应一个归档
    #[arg(long, default_value_t = 1)]
    depth: usize,

    /// 并发任务数，默认 CPU 数（最多 5）
    #[arg(long)]
    concurrency: Option<usize>,

    /// 只输出将要执行的动作
    #[arg(long)]
    dryrun: bool,

    /// S3 存储桶
    #[arg(long)]
    bucket: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// 仓库内的对象前缀
    #[arg(long)]
    prefix: Option<String>,

    /// 自定义 S3 端点（MinIO 等）
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    storage_class: Option<String>,

    /// 使用本地目录作为仓库
    #[arg(long, conflicts_with = "bucket")]
    repo_dir: Option<PathBuf>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// JSON 配置文件（日志、仓库）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 日志级别: error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// 日志文件路径
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// 命令行参数优先，其次是配置文件
    fn repository_config(&self, file: Option<RepositoryConfig>) -> Result<RepositoryConfig> {
        if let Some(dir) = &self.repo_dir {
            return Ok(RepositoryConfig::Fs {
                root: dir.to_string_lossy().into_owned(),
            });
        }
        if let Some(bucket) = &self.bucket {
            return Ok(RepositoryConfig::S3 {
                bucket: bucket.clone(),
                region: self.region.clone(),
                prefix: self.prefix.clone(),
                endpoint: self.endpoint.clone(),
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.clone(),
                storage_class: self.storage_class.clone(),
            });
        }
        match file {
            Some(config) => Ok(config),
            None => bail!("未指定仓库：需要 --bucket、--repo-dir 或配置文件中的 repository"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config = match &cli.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("读取配置文件 {:?} 失败", path))?,
        None => AppConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        app_config.log.level = level.clone();
    }
    if let Some(file) = &cli.log_file {
        app_config.log.file = Some(file.clone());
    }
    let _log_guard = logging::init(&app_config.log);

    let repository = create_repository(&cli.repository_config(app_config.repository.take())?)?;
    let run_config = RunConfig {
        source: cli.src.clone(),
        depth: cli.depth,
        concurrency: cli.concurrency.unwrap_or_else(default_concurrency),
        dry_run: cli.dryrun,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("收到中断信号，正在取消...");
                cancel.cancel();
            }
        });
    }

    let engine = SyncEngine::new(
        Arc::new(LocalStorage::new()),
        Arc::new(TarArchiver::new()),
        repository,
    );

    match engine.run(&run_config, &cancel).await {
        Ok(report) => {
            info!("运行 {} 完成", report.run_id);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!("同步失败: {}", e);
            Err(e.into())
        }
    }
}
