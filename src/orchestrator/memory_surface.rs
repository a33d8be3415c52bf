//! Ambient memory-bank surfaces named in §3/§6 that aren't part of the core
//! algorithms: `task_definition.md`, `uploaded_files/*`,
//! `key_decisions_and_learnings.md`, `execution_log_summary.md`, and
//! `final_answer_archive.md`.

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::types::{StepOutcome, UploadedFile};
use chrono::Utc;
use std::path::Path;

const TASK_DEFINITION_FILE: &str = "task_definition.md";
const UPLOADED_FILES_DIR: &str = "uploaded_files";
const KEY_DECISIONS_FILE: &str = "key_decisions_and_learnings.md";
const EXECUTION_LOG_SUMMARY_FILE: &str = "execution_log_summary.md";
const FINAL_ANSWER_ARCHIVE_FILE: &str = "final_answer_archive.md";

/// Strips any path components from an uploaded file's name, keeping only the
/// base name (§6: "Names are sanitized (base-name only, no path components)").
pub fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unnamed".to_string())
}

/// Persists the original user task and every uploaded file into the task's
/// memory bank (§2: "persists uploads and task definition").
pub async fn persist_task_definition(
    memory: &MemoryStore,
    parent_task_id: &str,
    user_task: &str,
    uploaded_files: &[UploadedFile],
) -> Result<()> {
    let mut markdown = format!(
        "# Task Definition\n\n_Recorded: {}_\n\n{}\n",
        Utc::now().to_rfc3339(),
        user_task
    );
    if !uploaded_files.is_empty() {
        markdown.push_str("\n## Uploaded files\n");
        for file in uploaded_files {
            markdown.push_str(&format!("- {}\n", sanitize_file_name(&file.name)));
        }
    }
    memory
        .overwrite_memory(parent_task_id, TASK_DEFINITION_FILE, &markdown)
        .await?;

    for file in uploaded_files {
        let safe_name = sanitize_file_name(&file.name);
        let relative = format!("{UPLOADED_FILES_DIR}/{safe_name}");
        memory
            .overwrite_memory(parent_task_id, &relative, &file.content)
            .await?;
    }
    Ok(())
}

/// Appends a one-line rationale every time the orchestrator makes a
/// consequential decision (accepting a revised plan, giving up after
/// exhausting revisions, and so on).
pub async fn append_key_decision(memory: &MemoryStore, parent_task_id: &str, decision: &str) -> Result<()> {
    let line = format!("- [{}] {decision}\n", Utc::now().to_rfc3339());
    memory.append_raw_text(parent_task_id, KEY_DECISIONS_FILE, &line).await
}

/// Overwrites the human-readable execution log summary after the execution
/// context changes, giving a single file a reader can skim without parsing
/// the full JSONL ledgers.
pub async fn write_execution_log_summary(
    memory: &MemoryStore,
    parent_task_id: &str,
    steps: &[StepOutcome],
) -> Result<()> {
    let mut markdown = String::from("# Execution Log Summary\n\n");
    for step in steps {
        markdown.push_str(&format!(
            "- stage {} / step {}: `{}` via `{}` -> {:?}{}\n",
            step.stage_index,
            step.dispatch_index,
            step.definition.narrative_step,
            step.definition.tool_name,
            step.status,
            step.error_details
                .as_ref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        ));
    }
    memory
        .overwrite_memory(parent_task_id, EXECUTION_LOG_SUMMARY_FILE, &markdown)
        .await
}

/// Appends the final synthesized answer to the task's running archive (§3:
/// `final_answer_archive.md`), so re-synthesis via `SYNTHESIZE_ONLY` never
/// loses an earlier answer.
pub async fn archive_final_answer(memory: &MemoryStore, parent_task_id: &str, answer: &str) -> Result<()> {
    let entry = format!("## {}\n\n{}\n\n", Utc::now().to_rfc3339(), answer);
    memory
        .append_raw_text(parent_task_id, FINAL_ANSWER_ARCHIVE_FILE, &entry)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_components_out_of_uploaded_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("report.txt"), "report.txt");
        assert_eq!(sanitize_file_name("/abs/path/file.csv"), "file.csv");
    }

    #[tokio::test]
    async fn persists_task_definition_and_uploaded_files() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();

        let files = vec![UploadedFile {
            name: "../secret.txt".into(),
            content: "contents".into(),
        }];
        persist_task_definition(&memory, "task-1", "do the thing", &files)
            .await
            .unwrap();

        let definition = memory.load_memory("task-1", TASK_DEFINITION_FILE).await.unwrap();
        assert!(definition.contains("do the thing"));
        assert!(definition.contains("secret.txt"));

        let uploaded = memory
            .load_memory("task-1", "uploaded_files/secret.txt")
            .await
            .unwrap();
        assert_eq!(uploaded, "contents");
    }

    #[tokio::test]
    async fn archives_final_answer_across_multiple_syntheses() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();

        archive_final_answer(&memory, "task-1", "first answer").await.unwrap();
        archive_final_answer(&memory, "task-1", "second answer").await.unwrap();

        let archive = memory
            .load_memory("task-1", FINAL_ANSWER_ARCHIVE_FILE)
            .await
            .unwrap();
        assert!(archive.contains("first answer"));
        assert!(archive.contains("second answer"));
    }
}
