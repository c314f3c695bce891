//! 测试用的打包器、仓库和本地扫描实现，带并发计数

use crate::core::archiver::Archiver;
use crate::core::pipe::PipeWriter;
use crate::error::{Result, SyncError};
use crate::storage::{LocalEntry, LocalLister, RemoteEntry, Repository, UploadSource};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// 同时进行中的调用计数
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    max: AtomicUsize,
}

pub struct InFlightGuard<'a>(&'a InFlight);

impl InFlight {
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[derive(Default)]
pub struct FakeArchiver {
    pub delay: Duration,
    fail_on: Option<String>,
    calls: Mutex<Vec<PathBuf>>,
    pub in_flight: InFlight,
}

impl FakeArchiver {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// 路径以 name 结尾时打包失败
    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn content_for(path: &Path) -> Vec<u8> {
        format!("archive of {}", path.display()).into_bytes()
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    async fn pack(&self, path: &Path, mut sink: PipeWriter, cancel: &CancellationToken) -> Result<()> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        let _guard = self.in_flight.enter();

        if self.fail_on.as_deref().is_some_and(|name| path.ends_with(name)) {
            return Err(SyncError::io(path, io::Error::from(io::ErrorKind::NotFound)));
        }

        sleep_or_cancel(self.delay, cancel).await?;
        sink.write_all(&Self::content_for(path))
            .await
            .map_err(|e| SyncError::io(path, e))?;
        sink.finish().await.map_err(|e| SyncError::io(path, e))
    }
}

#[derive(Default)]
pub struct FakeRepository {
    pub remote: Vec<RemoteEntry>,
    pub delay: Duration,
    fail_upload: Option<String>,
    pub fail_list: bool,
    pub fail_delete: bool,
    uploads: Mutex<Vec<(String, Vec<u8>)>>,
    deletes: Mutex<Vec<Vec<String>>>,
    list_calls: AtomicUsize,
    pub in_flight: InFlight,
}

impl FakeRepository {
    pub fn with_remote(remote: Vec<RemoteEntry>) -> Self {
        Self {
            remote,
            ..Default::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn failing_upload(key: &str) -> Self {
        Self {
            fail_upload: Some(key.to_string()),
            ..Default::default()
        }
    }

    pub fn failing_list() -> Self {
        Self {
            fail_list: true,
            ..Default::default()
        }
    }

    pub fn failing_delete() -> Self {
        Self {
            fail_delete: true,
            ..Default::default()
        }
    }

    pub fn fail_upload(mut self, key: &str) -> Self {
        self.fail_upload = Some(key.to_string());
        self
    }

    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.uploads().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys
    }

    pub fn deletes(&self) -> Vec<Vec<String>> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn list(&self, _cancel: &CancellationToken) -> Result<Vec<RemoteEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list {
            return Err(SyncError::Network("list failed".to_string()));
        }
        Ok(self.remote.clone())
    }

    async fn upload(&self, key: &str, mut source: UploadSource, cancel: &CancellationToken) -> Result<u64> {
        let _guard = self.in_flight.enter();

        let mut data = Vec::new();
        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            r = source.read_to_end(&mut data) => {
                r.map_err(|e| SyncError::Archive(e.to_string()))?;
            }
        }

        if self.fail_upload.as_deref() == Some(key) {
            return Err(SyncError::Network(format!("upload {} failed", key)));
        }
        sleep_or_cancel(self.delay, cancel).await?;

        let len = data.len() as u64;
        self.uploads.lock().unwrap().push((key.to_string(), data));
        Ok(len)
    }

    async fn delete(&self, keys: &[String], _cancel: &CancellationToken) -> Result<()> {
        self.deletes.lock().unwrap().push(keys.to_vec());
        if self.fail_delete {
            return Err(SyncError::Network("delete failed".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "fake:"
    }
}

#[derive(Default)]
pub struct FakeLister {
    pub entries: Vec<LocalEntry>,
    pub fail: bool,
    calls: AtomicUsize,
}

impl FakeLister {
    pub fn with_entries(entries: Vec<LocalEntry>) -> Self {
        Self {
            entries,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalLister for FakeLister {
    async fn list(&self, root: &Path, _max_depth: usize, _cancel: &CancellationToken) -> Result<Vec<LocalEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SyncError::io(root, io::Error::from(io::ErrorKind::PermissionDenied)));
        }
        Ok(self.entries.clone())
    }
}
