use crate::config::RunConfig;
use crate::core::archiver::Archiver;
use crate::core::comparator::{DiffResult, FileComparator};
use crate::core::pipe::DEFAULT_PIPE_CAPACITY;
use crate::core::pipeline::TransferPipeline;
use crate::error::Result;
use crate::storage::{LocalLister, Repository};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub repository: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub dry_run: bool,
    pub remote_objects: usize,
    pub local_objects: usize,
    pub files_uploaded: u64,
    pub files_deleted: u64,
    pub files_skipped: usize,
    pub bytes_transferred: u64,
    /// 计划执行的动作（dry-run 时即为全部输出）
    pub planned: DiffResult,
}

/// 同步引擎
///
/// 一次运行：列出远程、列出本地、比较、执行传输和删除。
pub struct SyncEngine {
    local: Arc<dyn LocalLister>,
    archiver: Arc<dyn Archiver>,
    repository: Arc<dyn Repository>,
    comparator: FileComparator,
    pipe_capacity: usize,
}

impl SyncEngine {
    pub fn new(
        local: Arc<dyn LocalLister>,
        archiver: Arc<dyn Archiver>,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            local,
            archiver,
            repository,
            comparator: FileComparator::new(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// 运行同步任务
    pub async fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> Result<SyncReport> {
        config.validate()?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("sync", run = %&run_id[..8]);
        self.run_inner(run_id, config, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        config: &RunConfig,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let start_time = chrono::Utc::now();
        info!(
            "开始同步: {:?} -> {} (depth={}, concurrency={}, dry_run={})",
            config.source,
            self.repository.name(),
            config.depth,
            config.concurrency,
            config.dry_run
        );

        let remote = self.repository.list(cancel).await?;
        info!("远程对象: {} 个", remote.len());
        for entry in &remote {
            debug!("远程: {} ({})", entry.key, entry.last_modified);
        }

        let local = self.local.list(&config.source, config.depth, cancel).await?;
        info!("本地条目: {} 个", local.len());
        for entry in &local {
            debug!("本地: {} ({})", entry.key, entry.last_modified);
        }

        let diff = self.comparator.compare(&remote, &local);
        let summary = diff.summary();
        info!(
            "比较完成: 上传 {}, 删除 {}, 跳过 {}",
            summary.upload_count, summary.delete_count, summary.skip_count
        );
        for key in &diff.skipped {
            debug!("已是最新: {}", key);
        }

        let pipeline = TransferPipeline::new(
            self.archiver.clone(),
            self.repository.clone(),
            config.concurrency,
        )
        .with_pipe_capacity(self.pipe_capacity);
        let outcome = pipeline
            .run(&config.source, &diff, config.dry_run, cancel)
            .await?;

        let end_time = chrono::Utc::now();
        info!(
            "同步完成: 上传 {}, 删除 {}, {} 字节, 耗时 {} ms",
            outcome.uploaded,
            outcome.deleted,
            outcome.bytes_transferred,
            (end_time - start_time).num_milliseconds()
        );

        Ok(SyncReport {
            run_id,
            repository: self.repository.name().to_string(),
            start_time,
            end_time,
            dry_run: config.dry_run,
            remote_objects: remote.len(),
            local_objects: local.len(),
            files_uploaded: outcome.uploaded,
            files_deleted: outcome.deleted,
            files_skipped: summary.skip_count,
            bytes_transferred: outcome.bytes_transferred,
            planned: diff,
        })
    }
}
