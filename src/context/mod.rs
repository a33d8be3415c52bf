//! Mega-context assembler (§4.2).
//!
//! Builds the single prompt string handed to the Language-Model Adapter by
//! greedily walking a priority-ordered list of sections within a fixed token
//! budget. No section is ever partially truncated mid-record: list sections
//! (chat history, key findings, execution context) are trimmed by dropping
//! whole records from the oldest end, and atomic sections (system prompt,
//! user task, summaries) are included whole or not at all.

use crate::error::ContextError;
use crate::memory::MemoryStore;
use crate::types::{FindingData, KeyFinding, UploadedFile};
use std::sync::Arc;

pub type Tokenizer = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Names of the sections in assembly-priority order, highest first, per the
/// default ordering (§4.2 [SUPPLEMENT]).
pub const DEFAULT_PRIORITY_ORDER: &[&str] = &[
    "systemPrompt",
    "originalUserTask",
    "currentProgressSummary",
    "currentNextObjective",
    "taskDefinition",
    "summarizedKeyFindingsText",
    "keyFindings",
    "recentErrorsSummary",
    "executionContext",
    "chatHistory",
    "uploadedFiles",
];

/// The single section that must fit or assembly fails outright.
const CRITICAL_SECTION: &str = "systemPrompt";

#[derive(Clone)]
enum SectionContent {
    /// Included whole or not at all.
    Atomic(String),
    /// Records kept newest-first; trimmed from the oldest (end of the
    /// vector, since callers pass newest-first) until the section fits.
    List(Vec<String>),
}

/// Everything the assembler needs to build one prompt.
#[derive(Clone, Default)]
pub struct ContextSpecification {
    pub system_prompt: String,
    pub original_user_task: String,
    pub current_progress_summary: String,
    pub current_next_objective: String,
    pub task_definition: String,
    pub summarized_key_findings_text: Option<String>,
    /// Newest-first. Trimmed to `max_latest_key_findings` (when nonzero)
    /// before rendering, then subject to the same list-section budget
    /// trimming as every other list section.
    pub key_findings: Vec<KeyFinding>,
    /// Caps how many of `key_findings` are considered at all, independent of
    /// the token budget. Zero means no cap.
    pub max_latest_key_findings: usize,
    /// When a finding's data is `FindingData::ReferenceToRawContent`, resolve
    /// and inline the referenced file's contents instead of just its
    /// preview. Requires the assembler to have been built with
    /// `ContextAssembler::with_memory`; falls back to the preview otherwise.
    pub include_raw_content_for_referenced_findings: bool,
    /// Needed to resolve `key_findings` raw-content references against the
    /// right task's memory bank.
    pub parent_task_id: String,
    pub recent_errors_summary: Option<String>,
    pub execution_context: Vec<String>,
    pub chat_history: Vec<String>,
    pub uploaded_files: Vec<UploadedFile>,
    pub preamble: String,
    pub postamble: String,
    pub priority_order: Option<Vec<String>>,
    pub token_budget: usize,
    /// Cache-control hints (§4.2 `enableMegaContextCache`/
    /// `megaContextCacheTTLSeconds`): opaque pass-throughs for callers that
    /// want to hand the assembled context to
    /// `LanguageModelAdapter::prepare_context_for_model`.
    pub enable_mega_context_cache: bool,
    pub mega_context_cache_ttl_seconds: Option<u64>,
}

impl ContextSpecification {
    fn sections(&self, key_findings_rendered: Vec<String>) -> Vec<(&'static str, SectionContent)> {
        vec![
            (
                "systemPrompt",
                SectionContent::Atomic(self.system_prompt.clone()),
            ),
            (
                "originalUserTask",
                SectionContent::Atomic(self.original_user_task.clone()),
            ),
            (
                "currentProgressSummary",
                SectionContent::Atomic(self.current_progress_summary.clone()),
            ),
            (
                "currentNextObjective",
                SectionContent::Atomic(self.current_next_objective.clone()),
            ),
            (
                "taskDefinition",
                SectionContent::Atomic(self.task_definition.clone()),
            ),
            (
                "summarizedKeyFindingsText",
                SectionContent::Atomic(self.summarized_key_findings_text.clone().unwrap_or_default()),
            ),
            ("keyFindings", SectionContent::List(key_findings_rendered)),
            (
                "recentErrorsSummary",
                SectionContent::Atomic(self.recent_errors_summary.clone().unwrap_or_default()),
            ),
            (
                "executionContext",
                SectionContent::List(self.execution_context.clone()),
            ),
            ("chatHistory", SectionContent::List(self.chat_history.clone())),
            (
                "uploadedFiles",
                SectionContent::List(
                    self.uploaded_files
                        .iter()
                        .map(|f| format!("# {}\n{}", f.name, f.content))
                        .collect(),
                ),
            ),
        ]
    }
}

pub struct ContextAssembler {
    tokenizer: Tokenizer,
    memory: Option<MemoryStore>,
}

impl ContextAssembler {
    pub fn new(tokenizer: Tokenizer) -> Self {
        Self {
            tokenizer,
            memory: None,
        }
    }

    /// An assembler that can resolve `FindingData::ReferenceToRawContent`
    /// findings back to their raw file contents (§4.2 step 4) when a
    /// `ContextSpecification` asks for it via
    /// `include_raw_content_for_referenced_findings`.
    pub fn with_memory(tokenizer: Tokenizer, memory: MemoryStore) -> Self {
        Self {
            tokenizer,
            memory: Some(memory),
        }
    }

    fn count(&self, text: &str) -> usize {
        (self.tokenizer)(text)
    }

    /// Renders `spec.key_findings` to strings, capping at
    /// `max_latest_key_findings` and resolving raw-content references when
    /// asked to and able to. A reference that can't be resolved (no memory
    /// store wired up, or the file is missing) falls back to the finding's
    /// stored preview rather than failing assembly.
    async fn render_key_findings(&self, spec: &ContextSpecification) -> Vec<String> {
        let findings: &[KeyFinding] = if spec.max_latest_key_findings > 0 {
            let cap = spec.max_latest_key_findings.min(spec.key_findings.len());
            &spec.key_findings[..cap]
        } else {
            &spec.key_findings[..]
        };

        let mut rendered = Vec::with_capacity(findings.len());
        for finding in findings {
            let body = match &finding.data {
                FindingData::Inline { content } => content.to_string(),
                FindingData::ReferenceToRawContent {
                    raw_content_path,
                    preview,
                } => {
                    if spec.include_raw_content_for_referenced_findings {
                        self.load_raw_content(&spec.parent_task_id, raw_content_path)
                            .await
                            .unwrap_or_else(|| preview.clone())
                    } else {
                        preview.clone()
                    }
                }
            };
            rendered.push(format!(
                "[{}] ({}): {}",
                finding.source_step_narrative, finding.source_tool_name, body
            ));
        }
        rendered
    }

    async fn load_raw_content(&self, parent_task_id: &str, raw_content_path: &str) -> Option<String> {
        let memory = self.memory.as_ref()?;
        match memory.load_memory(parent_task_id, raw_content_path).await {
            Ok(content) if !content.is_empty() => Some(content),
            _ => None,
        }
    }

    /// Greedily assembles sections within `spec.token_budget`, returning the
    /// final prompt string or a `ContextError` describing why it could not
    /// fit.
    pub async fn assemble(&self, spec: &ContextSpecification) -> Result<String, ContextError> {
        let framing_tokens = self.count(&spec.preamble) + self.count(&spec.postamble);
        if framing_tokens > spec.token_budget {
            return Err(ContextError::BudgetExceededByFraming {
                used: framing_tokens,
                limit: spec.token_budget,
            });
        }

        let order: Vec<String> = spec
            .priority_order
            .clone()
            .unwrap_or_else(|| DEFAULT_PRIORITY_ORDER.iter().map(|s| s.to_string()).collect());

        let key_findings_rendered = self.render_key_findings(spec).await;
        let all_sections = spec.sections(key_findings_rendered);
        let mut remaining = spec.token_budget - framing_tokens;
        let mut rendered_by_name: std::collections::HashMap<&str, String> = std::collections::HashMap::new();

        for name in &order {
            let Some((_, content)) = all_sections.iter().find(|(n, _)| n == name) else {
                continue;
            };

            match content {
                SectionContent::Atomic(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    let tokens = self.count(text);
                    if tokens > remaining {
                        if name == CRITICAL_SECTION {
                            return Err(ContextError::CriticalSectionDoesNotFit(name.clone()));
                        }
                        continue;
                    }
                    remaining -= tokens;
                    rendered_by_name.insert(leak_name(name), text.clone());
                }
                SectionContent::List(items) => {
                    let mut kept = Vec::new();
                    for item in items {
                        let tokens = self.count(item);
                        if tokens > remaining {
                            break;
                        }
                        remaining -= tokens;
                        kept.push(item.clone());
                    }
                    if !kept.is_empty() {
                        rendered_by_name.insert(leak_name(name), kept.join("\n\n"));
                    }
                }
            }
        }

        let mut body = String::new();
        body.push_str(&spec.preamble);
        for name in DEFAULT_PRIORITY_ORDER {
            if let Some(rendered) = rendered_by_name.get(name) {
                body.push_str(&format!("\n\n## {name}\n{rendered}"));
            }
        }
        body.push_str(&spec.postamble);

        let assembled_tokens = self.count(&body);
        if assembled_tokens > spec.token_budget {
            return Err(ContextError::AssembledContextTooLarge {
                assembled: assembled_tokens,
                limit: spec.token_budget,
            });
        }

        Ok(body)
    }
}

/// Section names are always one of the static `DEFAULT_PRIORITY_ORDER`
/// strings even when the caller supplies a custom ordering, so a `&'static
/// str` lookup key is safe without actually leaking memory per call.
fn leak_name(name: &str) -> &'static str {
    DEFAULT_PRIORITY_ORDER
        .iter()
        .find(|s| **s == name)
        .copied()
        .unwrap_or("uploadedFiles")
}

/// A whitespace-counting stand-in tokenizer for tests and for adapters that
/// have no real tokenizer wired up yet.
pub fn word_count_tokenizer() -> Tokenizer {
    Arc::new(|text: &str| text.split_whitespace().count().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(budget: usize) -> ContextSpecification {
        ContextSpecification {
            system_prompt: "you are an orchestrator".into(),
            original_user_task: "summarize the quarterly report".into(),
            token_budget: budget,
            ..Default::default()
        }
    }

    fn finding(data: FindingData) -> KeyFinding {
        KeyFinding {
            id: "f1".into(),
            source_step_narrative: "looked something up".into(),
            source_tool_name: "search".into(),
            data,
        }
    }

    #[tokio::test]
    async fn fits_everything_under_generous_budget() {
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let result = assembler.assemble(&spec(10_000)).await.unwrap();
        assert!(result.contains("systemPrompt"));
        assert!(result.contains("orchestrator"));
    }

    #[tokio::test]
    async fn critical_section_failure_is_fatal() {
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let mut s = spec(1);
        s.system_prompt = "way more than one token of system prompt".into();
        let err = assembler.assemble(&s).await.unwrap_err();
        assert!(matches!(err, ContextError::CriticalSectionDoesNotFit(_)));
    }

    #[tokio::test]
    async fn list_sections_drop_whole_records_not_partial() {
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let mut s = spec(12);
        s.chat_history = vec![
            "newest turn here".into(),
            "older turn here".into(),
            "oldest turn here".into(),
        ];
        let result = assembler.assemble(&s).await.unwrap();
        assert!(result.contains("newest turn here"));
    }

    #[tokio::test]
    async fn framing_alone_exceeding_budget_is_reported() {
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let mut s = spec(2);
        s.preamble = "one two three four five".into();
        let err = assembler.assemble(&s).await.unwrap_err();
        assert!(matches!(err, ContextError::BudgetExceededByFraming { .. }));
    }

    #[tokio::test]
    async fn max_latest_key_findings_caps_before_budget_trimming() {
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let mut s = spec(10_000);
        s.max_latest_key_findings = 1;
        s.key_findings = vec![
            finding(FindingData::Inline {
                content: serde_json::json!("first"),
            }),
            finding(FindingData::Inline {
                content: serde_json::json!("second"),
            }),
        ];
        let result = assembler.assemble(&s).await.unwrap();
        assert!(result.contains("first"));
        assert!(!result.contains("second"));
    }

    #[tokio::test]
    async fn reference_without_memory_falls_back_to_preview() {
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let mut s = spec(10_000);
        s.include_raw_content_for_referenced_findings = true;
        s.key_findings = vec![finding(FindingData::ReferenceToRawContent {
            raw_content_path: "raw_content/deadbeef.json".into(),
            preview: "truncated preview text".into(),
        })];
        let result = assembler.assemble(&s).await.unwrap();
        assert!(result.contains("truncated preview text"));
    }

    #[tokio::test]
    async fn reference_with_memory_resolves_full_content() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();
        memory
            .write_raw_content("task-1", "deadbeef", "the full raw content")
            .await
            .unwrap();

        let assembler = ContextAssembler::with_memory(word_count_tokenizer(), memory);
        let mut s = spec(10_000);
        s.parent_task_id = "task-1".into();
        s.include_raw_content_for_referenced_findings = true;
        s.key_findings = vec![finding(FindingData::ReferenceToRawContent {
            raw_content_path: "raw_content/deadbeef.json".into(),
            preview: "truncated preview text".into(),
        })];

        let result = assembler.assemble(&s).await.unwrap();
        assert!(result.contains("the full raw content"));
        assert!(!result.contains("truncated preview text"));
    }

    #[tokio::test]
    async fn reference_flag_off_uses_preview_even_with_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();
        memory
            .write_raw_content("task-1", "deadbeef", "the full raw content")
            .await
            .unwrap();

        let assembler = ContextAssembler::with_memory(word_count_tokenizer(), memory);
        let mut s = spec(10_000);
        s.parent_task_id = "task-1".into();
        s.key_findings = vec![finding(FindingData::ReferenceToRawContent {
            raw_content_path: "raw_content/deadbeef.json".into(),
            preview: "truncated preview text".into(),
        })];

        let result = assembler.assemble(&s).await.unwrap();
        assert!(result.contains("truncated preview text"));
    }
}
