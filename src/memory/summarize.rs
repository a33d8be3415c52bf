//! `getSummarizedMemory` / `getSummarizedRecords` (§4.1).
//!
//! Returns raw content verbatim when it is small enough, otherwise returns a
//! content-hash-validated cached summary or calls out to the Language-Model
//! Adapter to produce (and persist) a fresh one. The cache file pair
//! `<name>_summary.md` / `<name>_summary.md.meta.json` lives directly in the
//! memory bank directory, matching the filesystem layout named in §6.

use super::{content_hash, MemoryStore};
use crate::error::Result;
use crate::llm::LanguageModelAdapter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

const TEXT_PLACEHOLDER: &str = "{text_to_summarize}";

/// One record fed to `get_summarized_records`: either inline text or a
/// pointer to a file within the task's memory bank (e.g. a key finding's
/// `rawContentPath`).
#[derive(Debug, Clone)]
pub enum SummarizableRecord {
    Inline(String),
    PathReference(String),
}

/// Options recognized by both summarization operations.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    /// Content at or under this length is returned as-is (unless `force_summarize`).
    pub max_original_length: usize,
    /// Returned when the underlying file (or all referenced files) is absent.
    pub default_value: String,
    /// Must contain the literal token `{text_to_summarize}`.
    pub prompt_template: String,
    /// Whether to persist a freshly-generated summary to the cache.
    pub cache_summary: bool,
    /// Skip the size gate and always summarize.
    pub force_summarize: bool,
}

impl SummarizeOptions {
    pub fn render_prompt(&self, text: &str) -> String {
        self.prompt_template.replace(TEXT_PLACEHOLDER, text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryMeta {
    #[serde(rename = "originalContentHash")]
    original_content_hash: String,
    #[serde(rename = "summaryGeneratedTimestamp")]
    summary_generated_timestamp: DateTime<Utc>,
}

fn summary_file(name: &str) -> String {
    format!("{name}_summary.md")
}

fn summary_meta_file(name: &str) -> String {
    format!("{name}_summary.md.meta.json")
}

impl MemoryStore {
    /// Implements §4.1's `getSummarizedMemory`.
    pub async fn get_summarized_memory(
        &self,
        parent_task_id: &str,
        name: &str,
        llm: &dyn LanguageModelAdapter,
        opts: &SummarizeOptions,
    ) -> Result<String> {
        let raw = self.load_memory(parent_task_id, name).await?;
        if raw.is_empty() {
            return Ok(opts.default_value.clone());
        }

        if !opts.force_summarize && raw.len() <= opts.max_original_length {
            return Ok(raw);
        }

        self.summarize_and_cache(parent_task_id, name, &raw, llm, opts)
            .await
    }

    /// Implements §4.1's `getSummarizedRecords`: concatenates a heterogeneous
    /// list of inline/path-reference records and summarizes the combined text
    /// in one call, cached under a synthetic name derived from `cache_key`.
    pub async fn get_summarized_records(
        &self,
        parent_task_id: &str,
        cache_key: &str,
        records: &[SummarizableRecord],
        llm: &dyn LanguageModelAdapter,
        opts: &SummarizeOptions,
    ) -> Result<String> {
        let mut parts = Vec::with_capacity(records.len());
        for record in records {
            match record {
                SummarizableRecord::Inline(text) => parts.push(text.clone()),
                SummarizableRecord::PathReference(path) => {
                    let content = self.load_memory(parent_task_id, path).await?;
                    if !content.is_empty() {
                        parts.push(content);
                    }
                }
            }
        }

        if parts.is_empty() {
            return Ok(opts.default_value.clone());
        }

        let combined = parts.join("\n\n---\n\n");
        if !opts.force_summarize && combined.len() <= opts.max_original_length {
            return Ok(combined);
        }

        let name = format!("combined_{cache_key}");
        self.summarize_and_cache(parent_task_id, &name, &combined, llm, opts)
            .await
    }

    async fn summarize_and_cache(
        &self,
        parent_task_id: &str,
        name: &str,
        content: &str,
        llm: &dyn LanguageModelAdapter,
        opts: &SummarizeOptions,
    ) -> Result<String> {
        let hash = content_hash(content);

        if let Some(cached) = self.try_load_cached_summary(parent_task_id, name, &hash).await? {
            debug!(name, "getSummarizedMemory cache hit");
            return Ok(cached);
        }

        debug!(name, "getSummarizedMemory cache miss, invoking model");
        let prompt = opts.render_prompt(content);
        let summary = llm.generate_text(&prompt).await?;

        if opts.cache_summary {
            self.overwrite_memory(parent_task_id, &summary_file(name), &summary)
                .await?;
            let meta = SummaryMeta {
                original_content_hash: hash,
                summary_generated_timestamp: Utc::now(),
            };
            let meta_json = serde_json::to_string_pretty(&meta)?;
            self.overwrite_memory(parent_task_id, &summary_meta_file(name), &meta_json)
                .await?;
        }

        Ok(summary)
    }

    async fn try_load_cached_summary(
        &self,
        parent_task_id: &str,
        name: &str,
        current_hash: &str,
    ) -> Result<Option<String>> {
        let meta_raw = self.load_memory(parent_task_id, &summary_meta_file(name)).await?;
        if meta_raw.is_empty() {
            return Ok(None);
        }
        let meta: SummaryMeta = match serde_json::from_str(&meta_raw) {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        if meta.original_content_hash != current_hash {
            return Ok(None);
        }
        let summary = self.load_memory(parent_task_id, &summary_file(name)).await?;
        if summary.is_empty() {
            return Ok(None);
        }
        Ok(Some(summary))
    }
}
