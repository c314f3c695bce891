//! 传输流水线
//!
//! 入队任务把待上传条目推入有界队列（容量 = 并发数），队列满时挂起；
//! `concurrency` 个 worker 共享队列，各自执行打包+上传。
//! 任一失败都会取消整个运行，最终只返回第一个错误。
//! 全部上传结束且没有错误后，才执行一次批量删除。

use crate::core::archiver::Archiver;
use crate::core::comparator::DiffResult;
use crate::core::pipe::DEFAULT_PIPE_CAPACITY;
use crate::core::transfer::{TransferManager, TransferTask};
use crate::error::{Result, SyncError};
use crate::storage::Repository;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 流水线执行结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub uploaded: u64,
    pub deleted: u64,
    pub bytes_transferred: u64,
}

/// 传输统计
#[derive(Debug, Default)]
struct TransferStats {
    files_completed: AtomicU64,
    bytes_transferred: AtomicU64,
}

/// 记录第一个错误并取消运行
struct FirstFailure {
    slot: StdMutex<Option<SyncError>>,
    token: CancellationToken,
}

impl FirstFailure {
    fn new(token: CancellationToken) -> Self {
        Self {
            slot: StdMutex::new(None),
            token,
        }
    }

    fn record(&self, err: SyncError) {
        {
            let mut slot = self.slot.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                if err.is_cancelled() {
                    info!("传输已取消");
                } else {
                    error!("传输失败，取消剩余任务: {}", err);
                }
                *slot = Some(err);
            } else {
                debug!("忽略后续错误: {}", err);
            }
        }
        self.token.cancel();
    }

    fn take(&self) -> Option<SyncError> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

type TaskQueue = Arc<Mutex<mpsc::Receiver<TransferTask>>>;

/// 传输流水线
pub struct TransferPipeline {
    archiver: Arc<dyn Archiver>,
    repository: Arc<dyn Repository>,
    concurrency: usize,
    pipe_capacity: usize,
}

impl TransferPipeline {
    pub fn new(
        archiver: Arc<dyn Archiver>,
        repository: Arc<dyn Repository>,
        concurrency: usize,
    ) -> Self {
        Self {
            archiver,
            repository,
            concurrency: concurrency.max(1),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// 执行比较结果：先上传，再批量删除
    ///
    /// dry_run 时不调用打包、上传和删除，只记录每个决定。
    pub async fn run(
        &self,
        root: &Path,
        diff: &DiffResult,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome> {
        let tasks: Vec<TransferTask> = diff
            .to_upload
            .iter()
            .map(|entry| TransferTask::new(root, entry))
            .collect();

        if dry_run {
            for task in &tasks {
                info!("[dry-run] 上传: {:?} -> {}", task.source, task.destination);
            }
            for key in &diff.to_delete {
                info!("[dry-run] 删除: {}", key);
            }
            return Ok(PipelineOutcome::default());
        }

        let transfer = Arc::new(
            TransferManager::new(self.archiver.clone(), self.repository.clone())
                .with_pipe_capacity(self.pipe_capacity),
        );
        let run_token = cancel.child_token();
        let failure = Arc::new(FirstFailure::new(run_token.clone()));
        let stats = Arc::new(TransferStats::default());

        let (tx, rx) = mpsc::channel::<TransferTask>(self.concurrency);
        let queue: TaskQueue = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();

        {
            let token = run_token.clone();
            let failure = failure.clone();
            workers.spawn(async move {
                if let Err(e) = admit(tasks, tx, &token).await {
                    failure.record(e);
                }
            });
        }

        for id in 0..self.concurrency {
            workers.spawn(worker(
                id,
                queue.clone(),
                transfer.clone(),
                run_token.clone(),
                failure.clone(),
                stats.clone(),
            ));
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                failure.record(SyncError::Archive(format!("传输任务异常退出: {}", e)));
            }
        }

        if let Some(err) = failure.take() {
            return Err(err);
        }
        if run_token.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let uploaded = stats.files_completed.load(Ordering::Relaxed);
        let bytes_transferred = stats.bytes_transferred.load(Ordering::Relaxed);
        info!("上传完成: {} 个对象, {} 字节", uploaded, bytes_transferred);

        let mut deleted = 0;
        if !diff.to_delete.is_empty() {
            let keys: Vec<String> = diff.to_delete.iter().cloned().collect();
            for key in &keys {
                info!("删除: {}", key);
            }
            self.repository.delete(&keys, &run_token).await?;
            deleted = keys.len() as u64;
        }

        Ok(PipelineOutcome {
            uploaded,
            deleted,
            bytes_transferred,
        })
    }
}

/// 入队：队列满时挂起，运行取消时立即退出
async fn admit(
    tasks: Vec<TransferTask>,
    tx: mpsc::Sender<TransferTask>,
    cancel: &CancellationToken,
) -> Result<()> {
    for task in tasks {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            sent = tx.send(task) => {
                // 所有 worker 都已退出
                if sent.is_err() {
                    return Err(SyncError::Cancelled);
                }
            }
        }
    }
    Ok(())
}

async fn worker(
    id: usize,
    queue: TaskQueue,
    transfer: Arc<TransferManager>,
    cancel: CancellationToken,
    failure: Arc<FirstFailure>,
    stats: Arc<TransferStats>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            task = async { queue.lock().await.recv().await } => task,
        };
        let Some(mut task) = next else {
            break;
        };
        if cancel.is_cancelled() {
            break;
        }

        info!("上传: {:?} -> {}", task.source, task.destination);
        match transfer.execute(&mut task, &cancel).await {
            Ok(bytes) => {
                stats.files_completed.fetch_add(1, Ordering::Relaxed);
                stats.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
                debug!("worker {} 完成: {} ({} 字节)", id, task.destination, bytes);
            }
            Err(e) => {
                // 运行已被取消时，这里的错误只是连带结果
                let e = if cancel.is_cancelled() { SyncError::Cancelled } else { e };
                failure.record(e);
                break;
            }
        }
    }
}
