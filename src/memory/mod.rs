//! Per-task Memory Store (§4.1).
//!
//! Each task gets a directory `tasks_<YYYY-MM-DD>/<parent_task_id>/` holding
//! append-only JSONL ledgers, a markdown surface for human inspection, and a
//! content-hash-keyed summary cache. All operations are `async fn` over
//! `tokio::fs`; there is exactly one backend, so this is a concrete struct
//! rather than a trait.

mod cache;
mod summarize;

pub use cache::SummaryCache;
pub use summarize::{SummarizableRecord, SummarizeOptions};

use crate::error::{MemoryError, Result};
use crate::types::{ErrorRecord, KeyFinding};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_FINDINGS_FILE: &str = "key_findings.jsonl";
const ERRORS_FILE: &str = "errors_encountered.jsonl";
const CHAT_HISTORY_FILE: &str = "chat_history.jsonl";
pub(crate) const RAW_CONTENT_DIR: &str = "raw_content";
const SUMMARY_CACHE_DIR: &str = "summary_cache";

/// A single chat turn persisted to `chat_history.jsonl`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Filesystem-backed memory bank for one task.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    storage_root: PathBuf,
    max_jsonl_scan_lines: usize,
}

impl MemoryStore {
    pub fn new(storage_root: impl Into<PathBuf>, max_jsonl_scan_lines: usize) -> Self {
        Self {
            storage_root: storage_root.into(),
            max_jsonl_scan_lines,
        }
    }

    /// `tasks_<YYYY-MM-DD>/<parent_task_id>/`, per the ISO-date Open Question
    /// decision recorded in DESIGN.md.
    pub fn task_dir(&self, parent_task_id: &str) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d");
        self.storage_root
            .join(format!("tasks_{date}"))
            .join(parent_task_id)
    }

    /// Creates the on-disk layout for a new task. Idempotent.
    pub async fn initialize_task_memory(&self, parent_task_id: &str) -> Result<PathBuf> {
        let dir = self.task_dir(parent_task_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::create_dir_all(dir.join(RAW_CONTENT_DIR)).await?;
        tokio::fs::create_dir_all(dir.join(SUMMARY_CACHE_DIR)).await?;
        debug!(task_dir = %dir.display(), "initialized task memory");
        Ok(dir)
    }

    /// Appends one JSON-serializable record as a line to `relative_file`
    /// inside the task directory, creating the file if absent.
    pub async fn append_to_memory<T: Serialize>(
        &self,
        parent_task_id: &str,
        relative_file: &str,
        record: &T,
    ) -> Result<()> {
        let dir = self.task_dir(parent_task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(relative_file);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Appends raw text (not JSON-encoded) to `relative_file`, creating the
    /// file if absent. Used for the markdown append surfaces named in §3
    /// (`key_decisions_and_learnings.md`, `final_answer_archive.md`) that
    /// are read as prose rather than parsed as JSONL.
    pub async fn append_raw_text(
        &self,
        parent_task_id: &str,
        relative_file: &str,
        text: &str,
    ) -> Result<()> {
        let dir = self.task_dir(parent_task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(relative_file);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Atomically replaces the contents of `relative_file`: write to a
    /// temp file in the same directory, then rename over the target.
    pub async fn overwrite_memory(
        &self,
        parent_task_id: &str,
        relative_file: &str,
        content: &str,
    ) -> Result<()> {
        let dir = self.task_dir(parent_task_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(relative_file);
        let tmp_path = dir.join(format!(".{relative_file}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&tmp_path, content.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    pub async fn load_memory(&self, parent_task_id: &str, relative_file: &str) -> Result<String> {
        let path = self.task_dir(parent_task_id).join(relative_file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_key_finding(&self, parent_task_id: &str, finding: &KeyFinding) -> Result<()> {
        self.append_to_memory(parent_task_id, KEY_FINDINGS_FILE, finding)
            .await
    }

    pub async fn add_error_encountered(
        &self,
        parent_task_id: &str,
        error: &ErrorRecord,
    ) -> Result<()> {
        self.append_to_memory(parent_task_id, ERRORS_FILE, error)
            .await
    }

    pub async fn add_chat_turn(&self, parent_task_id: &str, turn: &ChatTurn) -> Result<()> {
        self.append_to_memory(parent_task_id, CHAT_HISTORY_FILE, turn)
            .await
    }

    pub async fn get_latest_key_findings(
        &self,
        parent_task_id: &str,
        n: usize,
    ) -> Result<Vec<KeyFinding>> {
        self.tail_jsonl(parent_task_id, KEY_FINDINGS_FILE, n).await
    }

    pub async fn get_latest_errors_encountered(
        &self,
        parent_task_id: &str,
        n: usize,
    ) -> Result<Vec<ErrorRecord>> {
        self.tail_jsonl(parent_task_id, ERRORS_FILE, n).await
    }

    pub async fn get_latest_chat_history(
        &self,
        parent_task_id: &str,
        n: usize,
    ) -> Result<Vec<ChatTurn>> {
        self.tail_jsonl(parent_task_id, CHAT_HISTORY_FILE, n).await
    }

    /// Scans `relative_file` backward from EOF, returning the newest `n`
    /// records. Bounded by `max_jsonl_scan_lines`: only that many trailing
    /// lines are ever held in memory at once, so a file much larger than the
    /// bound still returns the correct newest-n window without loading the
    /// whole file twice.
    async fn tail_jsonl<T: DeserializeOwned>(
        &self,
        parent_task_id: &str,
        relative_file: &str,
        n: usize,
    ) -> Result<Vec<T>> {
        let path = self.task_dir(parent_task_id).join(relative_file);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let window = self.max_jsonl_scan_lines.max(n);
        let mut ring: VecDeque<&str> = VecDeque::with_capacity(window.min(4096));
        let mut total_lines = 0usize;
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            total_lines += 1;
            if ring.len() == window {
                ring.pop_front();
            }
            ring.push_back(line);
        }
        if total_lines > window {
            warn!(
                file = relative_file,
                total_lines, window, "jsonl scan window exceeded, oldest lines dropped"
            );
        }

        let start = ring.len().saturating_sub(n);
        ring.into_iter()
            .skip(start)
            .map(|line| {
                serde_json::from_str(line).map_err(|e| MemoryError::Serialization(e).into())
            })
            .collect()
    }

    pub fn raw_content_path(&self, parent_task_id: &str, content_hash: &str) -> PathBuf {
        self.task_dir(parent_task_id)
            .join(RAW_CONTENT_DIR)
            .join(format!("{content_hash}.json"))
    }

    pub async fn write_raw_content(
        &self,
        parent_task_id: &str,
        content_hash: &str,
        content: &str,
    ) -> Result<PathBuf> {
        let dir = self.task_dir(parent_task_id).join(RAW_CONTENT_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = self.raw_content_path(parent_task_id, content_hash);
        tokio::fs::write(&path, content.as_bytes()).await?;
        Ok(path)
    }

    pub fn summary_cache(&self, parent_task_id: &str) -> SummaryCache {
        SummaryCache::new(self.task_dir(parent_task_id).join(SUMMARY_CACHE_DIR))
    }
}

pub(crate) fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FindingData, SubTaskStatus};

    fn store(dir: &Path) -> MemoryStore {
        MemoryStore::new(dir, 100)
    }

    #[tokio::test]
    async fn initialize_creates_expected_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let dir = store.initialize_task_memory("task-1").await.unwrap();
        assert!(dir.join(RAW_CONTENT_DIR).is_dir());
        assert!(dir.join(SUMMARY_CACHE_DIR).is_dir());
    }

    #[tokio::test]
    async fn append_and_tail_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.initialize_task_memory("task-1").await.unwrap();

        for i in 0..5 {
            let finding = KeyFinding {
                id: format!("f{i}"),
                source_step_narrative: "step".into(),
                source_tool_name: "tool".into(),
                data: FindingData::Inline {
                    content: serde_json::json!({"i": i}),
                },
            };
            store.add_key_finding("task-1", &finding).await.unwrap();
        }

        let latest = store.get_latest_key_findings("task-1", 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].id, "f3");
        assert_eq!(latest[1].id, "f4");
    }

    #[tokio::test]
    async fn tail_window_bounds_memory_but_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryStore::new(tmp.path(), 3);
        store.initialize_task_memory("task-1").await.unwrap();

        for i in 0..10 {
            let error = ErrorRecord {
                error_id: format!("e{i}"),
                source_step_narrative: "step".into(),
                source_tool_name: "tool".into(),
                error_message: "boom".into(),
                timestamp: Utc::now(),
            };
            store.add_error_encountered("task-1", &error).await.unwrap();
        }

        let latest = store
            .get_latest_errors_encountered("task-1", 2)
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[1].error_id, "e9");
    }

    #[tokio::test]
    async fn overwrite_memory_replaces_atomically() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        store.initialize_task_memory("task-1").await.unwrap();

        store
            .overwrite_memory("task-1", "cwc.md", "first")
            .await
            .unwrap();
        store
            .overwrite_memory("task-1", "cwc.md", "second")
            .await
            .unwrap();

        let content = store.load_memory("task-1", "cwc.md").await.unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("world"));
    }

    #[allow(dead_code)]
    fn _status_variant_reference() -> SubTaskStatus {
        SubTaskStatus::Completed
    }
}
