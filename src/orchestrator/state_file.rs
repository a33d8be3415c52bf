//! Task-state persistence (§3, §6 — `EXECUTE_PLANNED_TASK` and
//! `SYNTHESIZE_ONLY` both load a previously-saved `Task`).
//!
//! The whole `Task` aggregate is serialized to `task_state.json` using
//! `MemoryStore::overwrite_memory`'s atomic write-then-rename, so a crash
//! mid-write never leaves a corrupt state file behind.

use crate::error::Result;
use crate::memory::MemoryStore;
use crate::types::Task;

const TASK_STATE_FILE: &str = "task_state.json";

pub async fn save(memory: &MemoryStore, task: &Task) -> Result<()> {
    let json = serde_json::to_string_pretty(task)?;
    memory
        .overwrite_memory(&task.parent_task_id.0, TASK_STATE_FILE, &json)
        .await
}

pub async fn load(memory: &MemoryStore, parent_task_id: &str) -> Result<Option<Task>> {
    let contents = memory.load_memory(parent_task_id, TASK_STATE_FILE).await?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let task: Task = serde_json::from_str(&contents)?;
    Ok(Some(task))
}
