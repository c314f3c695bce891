use crate::storage::{LocalEntry, RemoteEntry};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// 比较结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    /// 远程不存在或已过期的本地条目（保持本地列表顺序）
    pub to_upload: Vec<LocalEntry>,
    /// 本地已不存在的远程对象（原始 key，带 .tar 后缀）
    pub to_delete: BTreeSet<String>,
    /// 已是最新、无需上传的 key
    pub skipped: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_delete.is_empty()
    }

    pub fn summary(&self) -> ActionSummary {
        ActionSummary {
            upload_count: self.to_upload.len(),
            delete_count: self.to_delete.len(),
            skip_count: self.skipped.len(),
        }
    }
}

/// 动作统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub upload_count: usize,
    pub delete_count: usize,
    pub skip_count: usize,
}

/// 快照比较器
///
/// 本地修改时间严格大于远程时才上传；时间相同视为已是最新。
#[derive(Debug, Default, Clone, Copy)]
pub struct FileComparator;

impl FileComparator {
    pub fn new() -> Self {
        Self
    }

    /// 比较远程快照和本地快照
    ///
    /// 纯函数，不做任何 IO。重复 key 以最后出现的条目为准。
    pub fn compare(&self, remote: &[RemoteEntry], local: &[LocalEntry]) -> DiffResult {
        // 逻辑 key -> 远程条目，匹配到的会被移除，剩下的就是要删除的
        let mut remaining: HashMap<&str, &RemoteEntry> = remote
            .iter()
            .map(|entry| (entry.logical_key(), entry))
            .collect();

        // 本地去重：保留第一次出现的位置，使用最后出现的条目
        let mut order: Vec<&str> = Vec::with_capacity(local.len());
        let mut latest: HashMap<&str, &LocalEntry> = HashMap::with_capacity(local.len());
        for entry in local {
            if latest.insert(entry.key.as_str(), entry).is_none() {
                order.push(entry.key.as_str());
            }
        }

        let mut result = DiffResult::default();

        for key in order {
            let local_entry = latest[key];
            match remaining.remove(key) {
                None => result.to_upload.push(local_entry.clone()),
                Some(remote_entry) if local_entry.last_modified > remote_entry.last_modified => {
                    tracing::debug!(
                        "本地较新: {} (local={}, remote={})",
                        key,
                        local_entry.last_modified,
                        remote_entry.last_modified
                    );
                    result.to_upload.push(local_entry.clone());
                }
                Some(_) => result.skipped.push(key.to_string()),
            }
        }

        result.to_delete = remaining
            .into_values()
            .map(|entry| entry.key.clone())
            .collect();

        result
    }
}
