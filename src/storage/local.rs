use super::{LocalEntry, LocalLister};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 本地目录扫描
///
/// 深度为 1 时只列出根目录的直接子项，子目录作为一个整体；
/// 深度为 N 时递归到第 N 层，第 N 层的目录不再展开。
///
/// 作为整体列出的目录，修改时间取其内部最新的修改时间，
/// 而不是目录本身的修改时间（目录本身的时间在子目录深处的文件被修改时不会变化）。
/// 名称不是合法 UTF-8 的条目无法映射为远程 key，扫描时跳过并记录警告。
#[derive(Debug, Default, Clone)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    fn scan(root: &Path, max_depth: usize, cancel: &CancellationToken) -> Result<Vec<LocalEntry>> {
        let meta = std::fs::metadata(root).map_err(|e| SyncError::io(root, e))?;
        if !meta.is_dir() {
            return Err(SyncError::io(
                root,
                io::Error::new(io::ErrorKind::InvalidInput, "不是目录"),
            ));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name();

        for (i, entry) in walker.into_iter().enumerate() {
            // 每处理一定数量检查一次取消状态
            if i % 100 == 0 && cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                SyncError::io(path, io::Error::from(e))
            })?;

            let Some(key) = relative_key(root, entry.path())? else {
                warn!("跳过非 UTF-8 名称: {:?}", entry.path());
                continue;
            };

            let is_dir = entry.file_type().is_dir();
            if is_dir && entry.depth() < max_depth {
                // 会被继续展开
                continue;
            }

            let last_modified = if is_dir {
                Self::newest_in_tree(entry.path())?
            } else {
                let meta = entry.metadata().map_err(|e| {
                    SyncError::io(entry.path(), io::Error::from(e))
                })?;
                modified_secs(&meta)
            };

            debug!("本地条目: {} (mtime={})", key, last_modified);
            entries.push(LocalEntry { key, last_modified });
        }

        Ok(entries)
    }

    /// 目录作为整体时，取其内部最新的修改时间
    fn newest_in_tree(dir: &Path) -> Result<i64> {
        let mut newest = 0;
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                SyncError::io(path, io::Error::from(e))
            })?;
            let meta = entry
                .metadata()
                .map_err(|e| SyncError::io(entry.path(), io::Error::from(e)))?;
            newest = newest.max(modified_secs(&meta));
        }
        Ok(newest)
    }
}

#[async_trait]
impl LocalLister for LocalStorage {
    async fn list(
        &self,
        root: &Path,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<LocalEntry>> {
        if max_depth == 0 {
            return Err(SyncError::InvalidConfig("depth 必须大于 0".to_string()));
        }

        let root = root.to_path_buf();
        let cancel = cancel.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || Self::scan(&root, max_depth, &cancel))
            .await
            .map_err(|e| SyncError::io(PathBuf::new(), io::Error::other(e)))?
    }
}

fn modified_secs(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

/// 相对路径转为 key（统一使用 /），名称不是 UTF-8 时返回 None
fn relative_key(root: &Path, path: &Path) -> Result<Option<String>> {
    let rel = path.strip_prefix(root).map_err(|_| {
        SyncError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "路径不在扫描根目录下"),
        )
    })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(name) = component {
            match name.to_str() {
                Some(name) => parts.push(name),
                None => return Ok(None),
            }
        }
    }
    Ok(Some(parts.join("/")))
}
