//! Runtime configuration for the orchestrator core.
//!
//! `AppConfig` is the single configuration struct threaded through the
//! `Orchestrator`, `MemoryStore`, `ContextAssembler`, and `PlanExecutor`. It
//! is loaded from a TOML file with `AppConfig::from_file`, falling back to
//! `AppConfig::default()` for anything the file omits.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/tasks")
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("./config/plan_templates")
}

fn default_capabilities_path() -> PathBuf {
    PathBuf::from("./config/capabilities.json")
}

fn default_sub_task_timeout_secs() -> u64 {
    30
}

fn default_max_jsonl_scan_lines() -> usize {
    10_000
}

fn default_max_revisions() -> u32 {
    2
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    1_000
}

fn default_context_token_budget() -> usize {
    32_000
}

fn default_max_context_key_findings() -> usize {
    10
}

/// Retry policy for transient Language-Model Adapter failures (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_delay_ms: default_retry_initial_delay_ms(),
        }
    }
}

/// Top-level application configuration (§2 ambient, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root directory under which `tasks_<YYYY-MM-DD>/<parent_task_id>/` memory
    /// banks are created.
    pub storage_root: PathBuf,

    /// Directory scanned at startup for plan template definitions.
    pub templates_dir: PathBuf,

    /// Path to the role/tool capabilities JSON config (see `capabilities.rs`).
    pub capabilities_path: PathBuf,

    /// Default per-sub-task dispatch timeout, in seconds.
    #[serde(
        rename = "default_sub_task_timeout_secs",
        default = "default_sub_task_timeout_secs"
    )]
    pub default_sub_task_timeout_secs: u64,

    /// Bound on how many lines `getLatestKeyFindings`/`getLatestErrorsEncountered`
    /// will scan backward from EOF before giving up.
    #[serde(default = "default_max_jsonl_scan_lines")]
    pub max_jsonl_scan_lines: usize,

    /// Maximum number of replanning attempts (spec §4.7: MAX_REVISIONS = 2,
    /// i.e. 3 total attempts including the first plan).
    #[serde(default = "default_max_revisions")]
    pub max_revisions: u32,

    /// Retry policy applied to transient LLM errors.
    pub retry_policy: RetryPolicy,

    /// Token budget used by the Context Assembler when the caller does not
    /// override it via `ContextSpecification`.
    #[serde(default = "default_context_token_budget")]
    pub default_context_token_budget: usize,

    /// How many of the most recent key findings the CWC update and final
    /// synthesis prompts pull from the memory bank (§4.2 `maxLatestKeyFindings`).
    #[serde(default = "default_max_context_key_findings")]
    pub max_context_key_findings: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            templates_dir: default_templates_dir(),
            capabilities_path: default_capabilities_path(),
            default_sub_task_timeout_secs: default_sub_task_timeout_secs(),
            max_jsonl_scan_lines: default_max_jsonl_scan_lines(),
            max_revisions: default_max_revisions(),
            retry_policy: RetryPolicy::default(),
            default_context_token_budget: default_context_token_budget(),
            max_context_key_findings: default_max_context_key_findings(),
        }
    }
}

impl AppConfig {
    pub fn default_sub_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_sub_task_timeout_secs)
    }

    /// Load configuration from a TOML file, logging and falling back to
    /// defaults for any field the file omits.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            OrchestratorError::Config(format!("could not read {}: {e}", path.display()))
        })?;

        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| OrchestratorError::Config(format!("invalid config TOML: {e}")))?;

        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.default_sub_task_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_revisions, 2);
        assert_eq!(config.retry_policy.max_attempts, 3);
    }

    #[tokio::test]
    async fn from_file_overrides_only_specified_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "max_revisions = 5\n")
            .await
            .unwrap();

        let config = AppConfig::from_file(&path).await.unwrap();
        assert_eq!(config.max_revisions, 5);
        assert_eq!(config.default_sub_task_timeout_secs, 30);
    }

    #[tokio::test]
    async fn from_file_missing_path_errors() {
        let result = AppConfig::from_file("/nonexistent/path/config.toml").await;
        assert!(result.is_err());
    }
}
