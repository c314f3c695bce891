use super::{RemoteEntry, Repository, UploadSource, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::RepositoryConfig;
use crate::core::buffer::BufferPool;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Builder, Metakey, Operator, Writer};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 上传分块大小（8MB），S3 分段上传要求每段至少 5MB
const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 基于 OpenDAL 的对象仓库（S3 / WebDAV / 本地目录 / 内存）
///
/// 仓库前缀作为 Operator 的 root，列出的 key 已经去掉前缀。
pub struct ObjectRepository {
    operator: Operator,
    name: String,
    pool: BufferPool,
}

impl ObjectRepository {
    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        match config {
            RepositoryConfig::Fs { root } => {
                use opendal::services::Fs;

                let builder = Fs::default().root(root);
                Ok(Self::new(Self::build(builder)?, format!("fs:{}", root)))
            }
            RepositoryConfig::S3 {
                bucket,
                region,
                prefix,
                endpoint,
                access_key,
                secret_key,
                storage_class,
            } => {
                use opendal::services::S3;

                let mut builder = S3::default().bucket(bucket).region(region);

                if let Some(ref ep) = endpoint {
                    builder = builder.endpoint(ep);
                }
                if let (Some(ak), Some(sk)) = (access_key, secret_key) {
                    builder = builder.access_key_id(ak).secret_access_key(sk);
                }
                if let Some(ref class) = storage_class {
                    builder = builder.default_storage_class(class);
                }

                let prefix = prefix
                    .as_deref()
                    .map(|p| p.trim_matches('/'))
                    .filter(|p| !p.is_empty());
                if let Some(p) = prefix {
                    builder = builder.root(&format!("/{}/", p));
                }

                let name = format!(
                    "s3://{}{}",
                    bucket,
                    prefix.map(|p| format!("/{}", p)).unwrap_or_default()
                );
                Ok(Self::new(Self::build(builder)?, name))
            }
            RepositoryConfig::WebDav {
                endpoint,
                username,
                password,
                root,
            } => {
                use opendal::services::Webdav;

                let mut builder = Webdav::default().endpoint(endpoint);
                if let Some(ref u) = username {
                    builder = builder.username(u);
                }
                if let Some(ref p) = password {
                    builder = builder.password(p);
                }
                if let Some(ref r) = root {
                    builder = builder.root(r);
                }

                let name = format!(
                    "webdav://{}{}",
                    endpoint.trim_end_matches('/'),
                    root.as_deref()
                        .map(|r| format!("/{}", r.trim_start_matches('/')))
                        .unwrap_or_default()
                );
                Ok(Self::new(Self::build(builder)?, name))
            }
            RepositoryConfig::Memory => {
                let builder = opendal::services::Memory::default();
                Ok(Self::new(Self::build(builder)?, "memory:".to_string()))
            }
        }
    }

    pub fn new(operator: Operator, name: String) -> Self {
        Self {
            operator,
            name,
            pool: BufferPool::default(),
        }
    }

    fn build(builder: impl Builder) -> Result<Operator> {
        // 添加超时层
        let operator = Operator::new(builder)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();
        Ok(operator)
    }

    async fn list_all(&self) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();

        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::LastModified | Metakey::Mode)
            .await
            .map_err(|e| SyncError::network("列出对象失败", e))?;

        while let Some(entry) = lister
            .try_next()
            .await
            .map_err(|e| SyncError::network("列出对象失败", e))?
        {
            let path = entry.path().trim_start_matches('/');

            // 跳过根目录和目录占位对象
            if path.is_empty() || path.ends_with('/') || entry.metadata().is_dir() {
                continue;
            }

            entries.push(RemoteEntry {
                key: path.to_string(),
                last_modified: entry
                    .metadata()
                    .last_modified()
                    .map_or(0, |t| t.timestamp()),
            });
        }

        Ok(entries)
    }

    /// 从 source 流式拷贝到 writer，使用池中的缓冲区
    async fn copy_into(
        &self,
        writer: &mut Writer,
        source: &mut UploadSource,
        key: &str,
    ) -> Result<u64> {
        let mut buf = self.pool.checkout();
        let mut total = 0u64;

        loop {
            let n = source
                .read(&mut buf)
                .await
                .map_err(|e| SyncError::Archive(format!("读取 {} 的归档流失败: {}", key, e)))?;
            if n == 0 {
                break;
            }
            writer
                .write(Bytes::copy_from_slice(&buf[..n]))
                .await
                .map_err(|e| SyncError::network(&format!("上传 {} 失败", key), e))?;
            total += n as u64;
        }

        writer
            .close()
            .await
            .map_err(|e| SyncError::network(&format!("上传 {} 失败", key), e))?;
        Ok(total)
    }
}

#[async_trait]
impl Repository for ObjectRepository {
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<RemoteEntry>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.list_all() => r,
        }
    }

    async fn upload(
        &self,
        key: &str,
        mut source: UploadSource,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut writer = self
            .operator
            .writer_with(key)
            .chunk(UPLOAD_CHUNK_SIZE)
            .await
            .map_err(|e| SyncError::network(&format!("创建 {} 的上传失败", key), e))?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.copy_into(&mut writer, &mut source, key) => r,
        };

        match result {
            Ok(total) => {
                debug!("上传完成: {} ({} 字节)", key, total);
                Ok(total)
            }
            Err(e) => {
                // 放弃未完成的上传，避免留下截断的对象
                if let Err(abort_err) = writer.abort().await {
                    debug!("放弃上传 {} 失败: {}", key, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, keys: &[String], cancel: &CancellationToken) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            r = self.operator.remove(keys.to_vec()) => {
                r.map_err(|e| SyncError::network(&format!("批量删除 {} 个对象失败", keys.len()), e))
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipe::pipe;
    use tokio::io::AsyncWriteExt;

    fn fs_repository(dir: &tempfile::TempDir) -> ObjectRepository {
        ObjectRepository::from_config(&RepositoryConfig::Fs {
            root: dir.path().to_string_lossy().to_string(),
        })
        .unwrap()
    }

    async fn upload_bytes(repo: &ObjectRepository, key: &str, data: &'static [u8]) -> Result<u64> {
        let (mut writer, reader) = pipe(16);
        let producer = tokio::spawn(async move {
            writer.write_all(data).await?;
            writer.finish().await
        });
        let n = repo.upload(key, Box::new(reader), &CancellationToken::new()).await;
        producer.await.unwrap().unwrap();
        n
    }

    #[tokio::test]
    async fn test_upload_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let repo = fs_repository(&dir);
        let cancel = CancellationToken::new();

        assert_eq!(upload_bytes(&repo, "obj1.tar", b"first object").await.unwrap(), 12);
        upload_bytes(&repo, "new/obj3.tar", b"nested object").await.unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("new/obj3.tar")).unwrap(),
            b"nested object"
        );

        let mut keys: Vec<_> = repo.list(&cancel).await.unwrap().into_iter().map(|e| e.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["new/obj3.tar", "obj1.tar"]);

        repo.delete(&["obj1.tar".to_string()], &cancel).await.unwrap();
        let keys: Vec<_> = repo.list(&cancel).await.unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["new/obj3.tar"]);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_not_stored() {
        let repo = ObjectRepository::from_config(&RepositoryConfig::Memory).unwrap();

        let (mut writer, reader) = pipe(16);
        writer.write_all(b"half").await.unwrap();
        drop(writer);

        let err = repo
            .upload("broken.tar", Box::new(reader), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Archive(_)));

        let stat = repo.operator.stat("broken.tar").await;
        assert_eq!(stat.unwrap_err().kind(), opendal::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_upload_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let repo = fs_repository(&dir);
        let cancel = CancellationToken::new();

        // 写端一直不结束，上传会等待读取
        let (_writer, reader) = pipe(16);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = repo.upload("slow.tar", Box::new(reader), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_delete_is_noop() {
        let repo = ObjectRepository::from_config(&RepositoryConfig::Memory).unwrap();
        repo.delete(&[], &CancellationToken::new()).await.unwrap();
        assert_eq!(repo.name(), "memory:");
    }
}
