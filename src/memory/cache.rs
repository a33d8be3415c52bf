//! Content-hash-keyed summary cache (§4.1, §4.2).
//!
//! `getSummarizedMemory` hashes the raw content it is asked to summarize; if
//! a cached summary for that hash already exists on disk it is returned
//! without re-invoking the summarizer. Each cache entry is a plain-text
//! summary file plus a `.meta.json` sidecar recording when it was written
//! and the summarizer's token-budget hint, mirroring the teacher's
//! convention of pairing a data file with a small JSON metadata file.

use super::content_hash;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMeta {
    created_at: DateTime<Utc>,
    source_len: usize,
}

/// A directory-scoped cache of summaries keyed by SHA-256 of their source
/// content.
#[derive(Debug, Clone)]
pub struct SummaryCache {
    dir: PathBuf,
}

impl SummaryCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn summary_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.txt"))
    }

    fn meta_path(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.meta.json"))
    }

    /// Returns the cached summary for `content` if present, otherwise calls
    /// `summarize` and persists the result keyed by the content's hash.
    pub async fn get_or_summarize<F, Fut>(&self, content: &str, summarize: F) -> Result<String>
    where
        F: FnOnce(&str) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let hash = content_hash(content);
        if let Some(cached) = self.try_get(&hash).await? {
            debug!(hash = %hash, "summary cache hit");
            return Ok(cached);
        }

        debug!(hash = %hash, "summary cache miss");
        let summary = summarize(content).await?;
        self.put(&hash, content.len(), &summary).await?;
        Ok(summary)
    }

    async fn try_get(&self, hash: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.summary_path(hash)).await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, hash: &str, source_len: usize, summary: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.summary_path(hash), summary.as_bytes()).await?;
        let meta = CacheMeta {
            created_at: Utc::now(),
            source_len,
        };
        let meta_json = serde_json::to_string_pretty(&meta)?;
        tokio::fs::write(self.meta_path(hash), meta_json.as_bytes()).await?;
        Ok(())
    }
}
