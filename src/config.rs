//! 应用配置模块

use crate::error::{Result, SyncError};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 默认并发上限（与 CPU 数取较小值）
pub const MAX_DEFAULT_CONCURRENCY: usize = 5;

/// 单次同步运行的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// 本地源目录
    pub source: PathBuf,
    /// 扫描深度，决定"一个条目一个归档"的粒度
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// 同时进行的打包+上传任务数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 只输出决策，不做任何远程修改
    #[serde(default)]
    pub dry_run: bool,
}

fn default_depth() -> usize {
    1
}

/// CPU 数，最多 5
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_CONCURRENCY)
}

impl RunConfig {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            depth: default_depth(),
            concurrency: default_concurrency(),
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth < 1 {
            return Err(SyncError::InvalidConfig("depth 必须大于 0".to_string()));
        }
        if self.concurrency < 1 {
            return Err(SyncError::InvalidConfig(
                "concurrency 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// 远程仓库配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum RepositoryConfig {
    /// 本地目录作为仓库
    Fs { root: String },
    S3 {
        bucket: String,
        region: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_class: Option<String>,
    },
    WebDav {
        endpoint: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        root: Option<String>,
    },
    /// 内存仓库，仅用于测试和演示
    Memory,
}

/// 配置文件内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryConfig>,
}

impl AppConfig {
    /// 从 JSON 配置文件加载，缺失的部分使用默认值
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| SyncError::InvalidConfig(format!("解析 {:?} 失败: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let mut config = RunConfig::new("/tmp/src");
        assert!(config.concurrency >= 1 && config.concurrency <= MAX_DEFAULT_CONCURRENCY);
        config.validate().unwrap();

        config.depth = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.depth = 2;
        config.concurrency = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"repository": {"type": "s3", "bucket": "backup", "region": "us-west-2", "storageClass": "GLACIER"}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(
            config.repository,
            Some(RepositoryConfig::S3 {
                bucket: "backup".to_string(),
                region: "us-west-2".to_string(),
                prefix: None,
                endpoint: None,
                access_key: None,
                secret_key: None,
                storage_class: Some("GLACIER".to_string()),
            })
        );
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(SyncError::InvalidConfig(_))));
    }
}
