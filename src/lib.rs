//! 把本地目录树按条目打包成 tar 归档，与远程对象仓库保持一致

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{AppConfig, RepositoryConfig, RunConfig};
pub use crate::core::{SyncEngine, SyncReport};
pub use error::{Result, SyncError};
