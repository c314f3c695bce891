pub mod local;
pub mod object;

use crate::config::RepositoryConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

pub use local::LocalStorage;
pub use object::ObjectRepository;

// ============ 公共常量 ============

/// 远程对象名后缀：远程 key = 本地相对路径 + ".tar"
pub const ARCHIVE_SUFFIX: &str = ".tar";

/// 非 IO 操作超时（秒）- list, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- 上传数据块等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 本地条目（相对扫描根目录，分隔符统一为 /）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub key: String,
    pub last_modified: i64,
}

/// 远程条目
///
/// `key` 是去掉仓库前缀后的对象名，保留 ".tar" 后缀；
/// 比较时使用 [`RemoteEntry::logical_key`]。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub key: String,
    pub last_modified: i64,
}

impl LocalEntry {
    pub fn new(key: impl Into<String>, last_modified: i64) -> Self {
        Self {
            key: key.into(),
            last_modified,
        }
    }

    /// 对应的远程对象名
    pub fn remote_key(&self) -> String {
        remote_key_for(&self.key)
    }
}

impl RemoteEntry {
    pub fn new(key: impl Into<String>, last_modified: i64) -> Self {
        Self {
            key: key.into(),
            last_modified,
        }
    }

    /// 去掉归档后缀后的逻辑 key，可直接与本地 key 比较
    pub fn logical_key(&self) -> &str {
        self.key.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(&self.key)
    }
}

pub fn remote_key_for(local_key: &str) -> String {
    format!("{}{}", local_key, ARCHIVE_SUFFIX)
}

/// 上传数据源
pub type UploadSource = Box<dyn AsyncRead + Send + Unpin>;

/// 本地快照
#[async_trait]
pub trait LocalLister: Send + Sync {
    /// 列出 root 下的条目，深度由 max_depth 限制
    async fn list(
        &self,
        root: &Path,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<LocalEntry>>;
}

/// 远程对象仓库
#[async_trait]
pub trait Repository: Send + Sync {
    /// 列出仓库中的全部对象
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<RemoteEntry>>;

    /// 读取 source 直到结束并保存为 key，返回写入的字节数
    async fn upload(
        &self,
        key: &str,
        source: UploadSource,
        cancel: &CancellationToken,
    ) -> Result<u64>;

    /// 批量删除，部分失败视为整体失败
    async fn delete(&self, keys: &[String], cancel: &CancellationToken) -> Result<()>;

    /// 获取仓库名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建仓库实例
pub fn create_repository(config: &RepositoryConfig) -> Result<Arc<dyn Repository>> {
    let repo = ObjectRepository::from_config(config)?;
    tracing::info!("初始化仓库: {}", repo.name());
    Ok(Arc::new(repo))
}
