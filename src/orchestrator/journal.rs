//! Execution journal (§4.5, `journalEntries`).
//!
//! A human-readable, append-only record of what the orchestrator did for a
//! task: which plan source was used, which stages completed, when
//! replanning kicked in, and how the task ended. Persisted alongside the
//! rest of the memory bank so a later `SYNTHESIZE_ONLY` call (or a human
//! looking at the task directory) can reconstruct what happened without
//! replaying the execution context.

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::types::{FailedStepDetails, PlanSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const JOURNAL_FILE: &str = "journal.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    PlanGenerated { source: PlanSource },
    StageCompleted { stage_index: usize },
    ExecutionFailed { failed_step: FailedStepDetails },
    ReplanAttempted { attempt: u32 },
    CwcUpdated,
    TaskCompleted,
    TaskFailed { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub event: JournalEvent,
}

pub async fn record(memory: &MemoryStore, parent_task_id: &str, event: JournalEvent) -> Result<()> {
    let entry = JournalEntry {
        timestamp: Utc::now(),
        event,
    };
    memory.append_to_memory(parent_task_id, JOURNAL_FILE, &entry).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_appended_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let memory = MemoryStore::new(tmp.path(), 1000);
        memory.initialize_task_memory("task-1").await.unwrap();

        record(&memory, "task-1", JournalEvent::PlanGenerated { source: PlanSource::Template })
            .await
            .unwrap();
        record(&memory, "task-1", JournalEvent::TaskCompleted).await.unwrap();

        let contents = memory.load_memory("task-1", JOURNAL_FILE).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("plan_generated"));
        assert!(lines[1].contains("task_completed"));
    }
}
