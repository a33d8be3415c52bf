//! Current Working Context update (§2: "the Orchestrator updates the
//! Current Working Context (CWC) via the language-model adapter, then
//! synthesizes a final answer").
//!
//! Runs once per execution attempt, after the Plan Executor reports success
//! and before synthesis. Asks the model for a compact JSON object describing
//! progress-so-far; a parse failure degrades to a locally-derived summary
//! rather than failing the whole task (§7: CWC update may fall back and log
//! the degradation).

use crate::context::{ContextAssembler, ContextSpecification};
use crate::error::Result;
use crate::llm::LanguageModelAdapter;
use crate::memory::MemoryStore;
use crate::types::{CurrentWorkingContext, StepOutcome, Task};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

const CWC_JSON_FILE: &str = "current_working_context.json";
const CWC_MARKDOWN_FILE: &str = "cwc.md";

#[derive(Debug, Deserialize)]
struct CwcModelResponse {
    #[serde(default)]
    summary_of_progress: String,
    #[serde(default)]
    next_objective: String,
    #[serde(default)]
    confidence_score: f32,
    #[serde(default)]
    identified_entities: Vec<String>,
    #[serde(default)]
    pending_questions: Vec<String>,
}

/// Builds a planning-sized context from the latest execution context and
/// asks the model to produce an updated CWC; persists both the structured
/// record and its markdown surface (§3: "persisted both as structured
/// record and as a markdown surface").
pub async fn update_cwc(
    memory: &MemoryStore,
    context_assembler: &ContextAssembler,
    llm: &dyn LanguageModelAdapter,
    task: &Task,
    latest_steps: &[StepOutcome],
    token_budget: usize,
    max_key_findings: usize,
) -> Result<CurrentWorkingContext> {
    let key_findings = memory
        .get_latest_key_findings(&task.parent_task_id.0, max_key_findings)
        .await?;

    let execution_summary: Vec<String> = latest_steps
        .iter()
        .map(|outcome| {
            format!(
                "[stage {}] {} ({}): {:?}{}",
                outcome.stage_index,
                outcome.definition.narrative_step,
                outcome.definition.tool_name,
                outcome.status,
                outcome
                    .error_details
                    .as_ref()
                    .map(|e| format!(" - {e}"))
                    .unwrap_or_default()
            )
        })
        .collect();

    let spec = ContextSpecification {
        system_prompt: "Given the execution so far, respond with a JSON object with fields \
            summary_of_progress, next_objective, confidence_score (0.0-1.0), \
            identified_entities (array of strings), pending_questions (array of strings)."
            .into(),
        original_user_task: task.user_task.clone(),
        current_progress_summary: task.current_working_context.summary_of_progress.clone(),
        execution_context: execution_summary,
        key_findings,
        max_latest_key_findings: max_key_findings,
        parent_task_id: task.parent_task_id.0.clone(),
        token_budget,
        ..Default::default()
    };

    let new_cwc = match context_assembler.assemble(&spec).await {
        Ok(prompt) => match llm.generate_text(&prompt).await {
            Ok(raw) => parse_cwc_response(&raw).unwrap_or_else(|| fallback_cwc(task, latest_steps)),
            Err(e) => {
                warn!(error = %e, "CWC update model call failed, falling back to local summary");
                fallback_cwc(task, latest_steps)
            }
        },
        Err(e) => {
            warn!(error = %e, "CWC update context assembly failed, falling back to local summary");
            fallback_cwc(task, latest_steps)
        }
    };

    persist(memory, &task.parent_task_id.0, &new_cwc).await?;
    Ok(new_cwc)
}

fn parse_cwc_response(raw: &str) -> Option<CurrentWorkingContext> {
    let trimmed = raw.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    let parsed: CwcModelResponse = serde_json::from_str(cleaned).ok()?;
    Some(CurrentWorkingContext {
        last_updated_at: Utc::now(),
        summary_of_progress: parsed.summary_of_progress,
        next_objective: parsed.next_objective,
        confidence_score: parsed.confidence_score,
        identified_entities: parsed.identified_entities,
        pending_questions: parsed.pending_questions,
    })
}

/// A locally-derived CWC used when the model call or its response can't be
/// used, so a failure there never blocks the task from reaching synthesis.
fn fallback_cwc(task: &Task, latest_steps: &[StepOutcome]) -> CurrentWorkingContext {
    let completed = latest_steps
        .iter()
        .filter(|s| s.error_details.is_none())
        .count();
    CurrentWorkingContext {
        last_updated_at: Utc::now(),
        summary_of_progress: format!(
            "{completed}/{} steps completed for: {}",
            latest_steps.len(),
            task.user_task
        ),
        next_objective: task.current_working_context.next_objective.clone(),
        confidence_score: task.current_working_context.confidence_score,
        identified_entities: task.current_working_context.identified_entities.clone(),
        pending_questions: task.current_working_context.pending_questions.clone(),
    }
}

async fn persist(memory: &MemoryStore, parent_task_id: &str, cwc: &CurrentWorkingContext) -> Result<()> {
    let json = serde_json::to_string_pretty(cwc)?;
    memory.overwrite_memory(parent_task_id, CWC_JSON_FILE, &json).await?;

    let markdown = format!(
        "# Current Working Context\n\n\
         _Last updated: {}_\n\n\
         ## Summary of progress\n{}\n\n\
         ## Next objective\n{}\n\n\
         ## Confidence\n{:.2}\n\n\
         ## Identified entities\n{}\n\n\
         ## Pending questions\n{}\n",
        cwc.last_updated_at.to_rfc3339(),
        non_empty(&cwc.summary_of_progress),
        non_empty(&cwc.next_objective),
        cwc.confidence_score,
        bullet_list(&cwc.identified_entities),
        bullet_list(&cwc.pending_questions),
    );
    memory
        .overwrite_memory(parent_task_id, CWC_MARKDOWN_FILE, &markdown)
        .await?;
    Ok(())
}

fn non_empty(s: &str) -> &str {
    if s.is_empty() {
        "(none)"
    } else {
        s
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::word_count_tokenizer;
    use crate::llm::TestAdapter;
    use crate::types::{Mode, TaskId};

    #[tokio::test]
    async fn falls_back_when_model_response_is_not_json() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let adapter = TestAdapter::new("test");
        adapter.queue_response("not json at all");

        let task = Task::new(TaskId::from("task-1"), "do something".into(), Mode::ExecuteFullPlan);
        let cwc = update_cwc(&memory, &assembler, &adapter, &task, &[], 10_000, 10)
            .await
            .unwrap();

        assert!(cwc.summary_of_progress.contains("do something"));
        let persisted = memory.load_memory("task-1", CWC_MARKDOWN_FILE).await.unwrap();
        assert!(persisted.contains("Current Working Context"));
    }

    #[tokio::test]
    async fn parses_well_formed_model_response() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();
        let assembler = ContextAssembler::new(word_count_tokenizer());
        let adapter = TestAdapter::new("test");
        adapter.queue_response(
            r#"{"summary_of_progress":"done step 1","next_objective":"do step 2","confidence_score":0.8,"identified_entities":["acme corp"],"pending_questions":[]}"#,
        );

        let task = Task::new(TaskId::from("task-1"), "research acme corp".into(), Mode::ExecuteFullPlan);
        let cwc = update_cwc(&memory, &assembler, &adapter, &task, &[], 10_000, 10)
            .await
            .unwrap();

        assert_eq!(cwc.summary_of_progress, "done step 1");
        assert_eq!(cwc.confidence_score, 0.8);
        assert_eq!(cwc.identified_entities, vec!["acme corp".to_string()]);
    }
}
