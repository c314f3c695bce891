//! 错误类型

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 同步过程中的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 本地文件系统错误（列目录、打包）
    #[error("本地 IO 错误 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 远程存储错误（列表、上传、删除）
    #[error("远程存储错误: {0}")]
    Network(String),

    /// 打包失败（不属于某个具体路径）
    #[error("打包失败: {0}")]
    Archive(String),

    /// 运行被取消（通常由其他任务的失败触发）
    #[error("操作已取消")]
    Cancelled,

    /// 配置无效
    #[error("配置无效: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn network(context: &str, err: impl std::fmt::Display) -> Self {
        SyncError::Network(format!("{}: {}", context, err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_context() {
        let err = SyncError::network("上传 a.tar 失败", "connection reset");
        assert_eq!(err.to_string(), "远程存储错误: 上传 a.tar 失败: connection reset");
        assert!(!err.is_cancelled());
        assert!(SyncError::Cancelled.is_cancelled());
    }
}
