//! Core data types for the task orchestrator (spec §3).
//!
//! `Task` is the root aggregate; `Plan`/`Stage`/`SubTaskDefinition` are the
//! three nesting levels of an executable plan; `StepOutcome`, `KeyFinding`,
//! and `ErrorRecord` are the append-only records produced during execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies the task this aggregate is keyed by (`parent_task_id` in the spec).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier assigned to a sub-task at dispatch time (§3, "Sub-Task Message").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubTaskId(pub Uuid);

impl SubTaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four invocation modes (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    PlanOnly,
    ExecuteFullPlan,
    ExecutePlannedTask,
    SynthesizeOnly,
}

/// Task status (§3). `InProgress` is an internal bookkeeping state never
/// written to a terminal task-state file — only the five spec-named states
/// are valid terminal/persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    InProgress,
    PlanGenerated,
    Completed,
    FailedPlanning,
    FailedExecution,
    CriticalError,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }
}

/// A sub-task definition as it appears inside a `Stage` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskDefinition {
    pub assigned_agent_role: String,
    pub tool_name: String,
    pub sub_task_input: serde_json::Value,
    pub narrative_step: String,
    /// Overrides `AppConfig.default_sub_task_timeout` for this sub-task only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_override: Option<std::time::Duration>,
}

/// An unordered set of parallel sub-tasks (§3). Represented as a `Vec` because
/// dispatch order within a stage must still be tracked for the execution
/// context's ordering invariant even though scheduling itself is parallel.
pub type Stage = Vec<SubTaskDefinition>;

/// An ordered sequence of stages (§3). Stages are strictly sequential.
pub type Plan = Vec<Stage>;

/// Where a `Plan` came from (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Template,
    Model,
}

/// A message dispatched to a worker (§3, "Sub-Task Message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskMessage {
    pub sub_task_id: SubTaskId,
    pub parent_task_id: TaskId,
    pub definition: SubTaskDefinition,
}

/// Status of a completed sub-task dispatch (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubTaskStatus {
    Completed,
    Failed,
}

/// A result delivered back over the results channel (§3, "Sub-Task Result").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskResult {
    pub sub_task_id: SubTaskId,
    pub status: SubTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

impl SubTaskResult {
    pub fn success(sub_task_id: SubTaskId, result_data: serde_json::Value) -> Self {
        Self {
            sub_task_id,
            status: SubTaskStatus::Completed,
            result_data: Some(result_data),
            error_details: None,
        }
    }

    pub fn failure(sub_task_id: SubTaskId, error_details: impl Into<String>) -> Self {
        Self {
            sub_task_id,
            status: SubTaskStatus::Failed,
            result_data: None,
            error_details: Some(error_details.into()),
        }
    }
}

/// One entry in the execution context (§3, "Step Outcome"). The execution
/// context is append-only and ordered by (stage_index, dispatch_index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    pub sub_task_id: SubTaskId,
    pub definition: SubTaskDefinition,
    pub status: SubTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_result_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub stage_index: usize,
    pub dispatch_index: usize,
}

/// Data carried by a Key Finding: either inline content or a pointer to a
/// raw-content file (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingData {
    Inline {
        content: serde_json::Value,
    },
    ReferenceToRawContent {
        #[serde(rename = "rawContentPath")]
        raw_content_path: String,
        preview: String,
    },
}

/// A compact record of a successful step's output (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    pub id: String,
    pub source_step_narrative: String,
    pub source_tool_name: String,
    pub data: FindingData,
}

/// A compact record of a failed step's output (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: String,
    pub source_step_narrative: String,
    pub source_tool_name: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

/// The Current Working Context snapshot (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWorkingContext {
    pub last_updated_at: DateTime<Utc>,
    pub summary_of_progress: String,
    pub next_objective: String,
    pub confidence_score: f32,
    pub identified_entities: Vec<String>,
    pub pending_questions: Vec<String>,
}

impl CurrentWorkingContext {
    pub fn empty() -> Self {
        Self {
            last_updated_at: Utc::now(),
            summary_of_progress: String::new(),
            next_objective: String::new(),
            confidence_score: 0.0,
            identified_entities: Vec::new(),
            pending_questions: Vec::new(),
        }
    }
}

/// An uploaded file as provided by the caller (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub content: String,
}

/// Structured details of the first failure encountered in a failed execution
/// attempt (§4.5, `failedStepDetails`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedStepDetails {
    pub sub_task_id: SubTaskId,
    pub narrative_step: String,
    pub tool_name: String,
    pub error_message: String,
    pub stage_index: usize,
}

/// The root aggregate (§3, "Task").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub parent_task_id: TaskId,
    pub user_task: String,
    pub mode: Mode,
    pub status: TaskStatus,
    pub plan: Option<Plan>,
    pub execution_context: Vec<StepOutcome>,
    pub final_answer: Option<String>,
    pub error_summary: Option<ErrorSummary>,
    pub current_working_context: CurrentWorkingContext,
    pub revision_attempt: u32,
}

impl Task {
    pub fn new(parent_task_id: TaskId, user_task: String, mode: Mode) -> Self {
        Self {
            parent_task_id,
            user_task,
            mode,
            status: TaskStatus::InProgress,
            plan: None,
            execution_context: Vec::new(),
            final_answer: None,
            error_summary: None,
            current_working_context: CurrentWorkingContext::empty(),
            revision_attempt: 0,
        }
    }
}

/// Structured failure summary surfaced to the caller (§6, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_step_narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_error_message: Option<String>,
}

/// Request shape for `handle_user_task` (§6).
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub user_task: String,
    pub uploaded_files: Vec<UploadedFile>,
    pub parent_task_id: TaskId,
    pub task_to_load: Option<TaskId>,
    pub mode: Mode,
}

/// Response shape for `handle_user_task` (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
    pub message: String,
    pub original_task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    pub current_working_context: CurrentWorkingContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_summary: Option<ErrorSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_terminal() {
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::FailedExecution.is_terminal());
        assert!(TaskStatus::CriticalError.is_terminal());
    }

    #[test]
    fn sub_task_result_constructors() {
        let id = SubTaskId::new();
        let ok = SubTaskResult::success(id, serde_json::json!({"x": 1}));
        assert_eq!(ok.status, SubTaskStatus::Completed);
        assert!(ok.error_details.is_none());

        let fail = SubTaskResult::failure(id, "boom");
        assert_eq!(fail.status, SubTaskStatus::Failed);
        assert_eq!(fail.error_details.as_deref(), Some("boom"));
    }

    #[test]
    fn task_id_round_trips_through_json() {
        let id = TaskId::from("abc-123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc-123\"");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
