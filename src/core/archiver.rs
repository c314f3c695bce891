//! 打包：把本地文件或目录写成 tar 流

use crate::core::pipe::PipeWriter;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

/// 打包器
///
/// 成功时必须调用 `sink.finish()`；失败时直接 drop，读端会收到错误。
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn pack(&self, path: &Path, sink: PipeWriter, cancel: &CancellationToken) -> Result<()>;
}

/// tar 打包器
///
/// 条目名相对于被打包路径的父目录，打包 `root/def` 得到 `def/...`。
/// 文件内容边读边写，不会整体读入内存。
#[derive(Debug, Default, Clone)]
pub struct TarArchiver;

impl TarArchiver {
    pub fn new() -> Self {
        Self
    }

    fn write_tar(
        path: &Path,
        sink: SyncIoBridge<PipeWriter>,
        cancel: &CancellationToken,
    ) -> Result<PipeWriter> {
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let mut builder = tar::Builder::new(sink);
        builder.follow_symlinks(false);

        for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let entry = entry.map_err(|e| {
                let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
                SyncError::io(at, io::Error::from(e))
            })?;

            let name = match entry.path().strip_prefix(base) {
                Ok(name) if !name.as_os_str().is_empty() => name.to_path_buf(),
                _ => continue,
            };

            debug!("打包: {:?}", name);
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| SyncError::io(entry.path(), e))?;
        }

        let mut sink = builder
            .into_inner()
            .map_err(|e| SyncError::Archive(format!("结束 {:?} 的归档失败: {}", path, e)))?;
        sink.flush().map_err(|e| SyncError::io(path, e))?;
        Ok(sink.into_inner())
    }
}

#[async_trait]
impl Archiver for TarArchiver {
    async fn pack(&self, path: &Path, sink: PipeWriter, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let bridge = SyncIoBridge::new(sink);
        let owned: PathBuf = path.to_path_buf();
        let token = cancel.clone();

        let sink = tokio::task::spawn_blocking(move || Self::write_tar(&owned, bridge, &token))
            .await
            .map_err(|e| SyncError::Archive(format!("打包任务异常退出: {}", e)))??;

        sink.finish().await.map_err(|e| SyncError::io(path, e))
    }
}
