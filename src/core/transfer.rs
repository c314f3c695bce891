//! 单个传输任务：打包和上传同时进行，通过管道相连

use crate::core::archiver::Archiver;
use crate::core::pipe::{pipe, DEFAULT_PIPE_CAPACITY};
use crate::error::Result;
use crate::storage::{LocalEntry, Repository};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferStatus::Queued => write!(f, "queued"),
            TransferStatus::Running => write!(f, "running"),
            TransferStatus::Done => write!(f, "done"),
            TransferStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 一个待上传的条目
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// 本地完整路径
    pub source: PathBuf,
    /// 远程对象名
    pub destination: String,
    pub status: TransferStatus,
}

impl TransferTask {
    pub fn new(root: &Path, entry: &LocalEntry) -> Self {
        let source = entry
            .key
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(root.to_path_buf(), |path, part| path.join(part));
        let destination = entry.remote_key();

        Self {
            source,
            destination,
            status: TransferStatus::Queued,
        }
    }
}

/// 传输管理器
pub struct TransferManager {
    archiver: Arc<dyn Archiver>,
    repository: Arc<dyn Repository>,
    pipe_capacity: usize,
}

impl TransferManager {
    pub fn new(archiver: Arc<dyn Archiver>, repository: Arc<dyn Repository>) -> Self {
        Self {
            archiver,
            repository,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// 执行一个任务，返回上传的字节数
    ///
    /// 任一端失败都会让另一端结束：打包失败时读端收到错误，
    /// 上传失败时读端被释放，写端随之报错。
    pub async fn execute(&self, task: &mut TransferTask, cancel: &CancellationToken) -> Result<u64> {
        task.status = TransferStatus::Running;
        debug!("开始传输: {:?} -> {}", task.source, task.destination);

        let (writer, reader) = pipe(self.pipe_capacity);
        let archive = self.archiver.pack(&task.source, writer, cancel);
        let upload = self
            .repository
            .upload(&task.destination, Box::new(reader), cancel);

        let result = tokio::try_join!(archive, upload).map(|(_, bytes)| bytes);

        task.status = match result {
            Ok(_) => TransferStatus::Done,
            Err(_) => TransferStatus::Failed,
        };
        debug!("传输结束: {} ({})", task.destination, task.status);
        result
    }
}
