//! Plan Executor (§4.5).
//!
//! Dispatches a `Plan` stage by stage: every sub-task in a stage is sent in
//! parallel, the executor awaits all of that stage's results before moving
//! to the next stage, and the whole run short-circuits on the first failure
//! (stages after the failing one are never dispatched).

use crate::dispatch::{dispatch, ResultRouter, SubTaskSender};
use crate::error::OrchestratorError;
use crate::memory::MemoryStore;
use crate::types::{
    ErrorRecord, FailedStepDetails, FindingData, KeyFinding, Plan, StepOutcome, SubTaskMessage,
    SubTaskResult, SubTaskStatus, TaskId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A completed sub-task's serialized `result_data` at or under this many
/// bytes is kept inline in its `KeyFinding`; larger results are written to
/// `raw_content/<hash>.json` and the finding carries a pointer plus a
/// preview instead (§3: "large raw outputs live in separate files").
const INLINE_FINDING_BYTE_LIMIT: usize = 4_096;

/// Length of the preview text kept alongside an externalized finding.
const RAW_CONTENT_PREVIEW_CHARS: usize = 280;

/// Output of one `PlanExecutor::execute` run (§4.5).
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_context: Vec<StepOutcome>,
    pub key_findings: Vec<KeyFinding>,
    pub error_records: Vec<ErrorRecord>,
    pub success: bool,
    pub failed_step_details: Option<FailedStepDetails>,
}

pub struct PlanExecutor {
    senders: HashMap<String, SubTaskSender>,
    router: Arc<ResultRouter>,
    memory: MemoryStore,
    default_timeout: Duration,
}

impl PlanExecutor {
    pub fn new(
        senders: HashMap<String, SubTaskSender>,
        router: Arc<ResultRouter>,
        memory: MemoryStore,
        default_timeout: Duration,
    ) -> Self {
        Self {
            senders,
            router,
            memory,
            default_timeout,
        }
    }

    /// Executes `plan` against `parent_task_id`, honoring `cancellation` at
    /// each stage boundary (§5: "abort at the next suspension point").
    pub async fn execute(
        &self,
        parent_task_id: &TaskId,
        plan: &Plan,
        cancellation: &CancellationToken,
    ) -> Result<ExecutionReport, OrchestratorError> {
        let mut execution_context = Vec::new();
        let mut key_findings = Vec::new();
        let mut error_records = Vec::new();

        for (stage_index, stage) in plan.iter().enumerate() {
            if cancellation.is_cancelled() {
                info!(stage_index, "cancellation observed at stage boundary");
                break;
            }

            info!(stage_index, sub_tasks = stage.len(), "dispatching stage");

            let mut stage_waiters = Vec::with_capacity(stage.len());
            for (dispatch_index, definition) in stage.iter().enumerate() {
                let sender = self.senders.get(&definition.assigned_agent_role).ok_or_else(|| {
                    OrchestratorError::CriticalError(format!(
                        "no dispatch channel registered for role '{}'",
                        definition.assigned_agent_role
                    ))
                })?;

                let sub_task_id = crate::types::SubTaskId::new();
                let receiver = self.router.register(sub_task_id);
                let message = SubTaskMessage {
                    sub_task_id,
                    parent_task_id: parent_task_id.clone(),
                    definition: definition.clone(),
                };

                dispatch(sender, message).await?;
                let timeout = definition.timeout_override.unwrap_or(self.default_timeout);
                stage_waiters.push((dispatch_index, sub_task_id, receiver, timeout));
            }

            let mut stage_failed = None;
            for (dispatch_index, sub_task_id, receiver, timeout) in stage_waiters {
                let definition = &stage[dispatch_index];
                let outcome = match tokio::time::timeout(timeout, receiver).await {
                    Ok(Ok(result)) => self
                        .record_result(parent_task_id, stage_index, dispatch_index, definition.clone(), result, &mut key_findings, &mut error_records)
                        .await?,
                    Ok(Err(_)) => {
                        self.router.deregister(&sub_task_id);
                        warn!(%sub_task_id, "result channel dropped before producing a result");
                        self.record_failure(
                            parent_task_id,
                            stage_index,
                            dispatch_index,
                            definition.clone(),
                            sub_task_id,
                            "worker dropped without producing a result".to_string(),
                            &mut error_records,
                        )
                        .await?
                    }
                    Err(_) => {
                        self.router.deregister(&sub_task_id);
                        warn!(%sub_task_id, timeout = ?timeout, "sub-task timed out");
                        self.record_failure(
                            parent_task_id,
                            stage_index,
                            dispatch_index,
                            definition.clone(),
                            sub_task_id,
                            format!("sub-task timed out after {timeout:?}"),
                            &mut error_records,
                        )
                        .await?
                    }
                };

                let is_failure = outcome.status == SubTaskStatus::Failed;
                execution_context.push(outcome.clone());
                if is_failure && stage_failed.is_none() {
                    stage_failed = Some(FailedStepDetails {
                        sub_task_id: outcome.sub_task_id,
                        narrative_step: outcome.definition.narrative_step.clone(),
                        tool_name: outcome.definition.tool_name.clone(),
                        error_message: outcome
                            .error_details
                            .clone()
                            .unwrap_or_else(|| "unknown error".into()),
                        stage_index,
                    });
                }
            }

            if let Some(failed) = stage_failed {
                return Ok(ExecutionReport {
                    execution_context,
                    key_findings,
                    error_records,
                    success: false,
                    failed_step_details: Some(failed),
                });
            }
        }

        Ok(ExecutionReport {
            execution_context,
            key_findings,
            error_records,
            success: true,
            failed_step_details: None,
        })
    }

    async fn record_result(
        &self,
        parent_task_id: &TaskId,
        stage_index: usize,
        dispatch_index: usize,
        definition: crate::types::SubTaskDefinition,
        result: SubTaskResult,
        key_findings: &mut Vec<KeyFinding>,
        error_records: &mut Vec<ErrorRecord>,
    ) -> Result<StepOutcome, OrchestratorError> {
        match result.status {
            SubTaskStatus::Completed => {
                let content = result.result_data.clone().unwrap_or(serde_json::Value::Null);
                let data = self.externalize_if_large(parent_task_id, &content).await?;
                let finding = KeyFinding {
                    id: Uuid::new_v4().to_string(),
                    source_step_narrative: definition.narrative_step.clone(),
                    source_tool_name: definition.tool_name.clone(),
                    data,
                };
                self.memory.add_key_finding(&parent_task_id.0, &finding).await?;
                key_findings.push(finding);

                debug!(sub_task_id = %result.sub_task_id, "sub-task completed");
                Ok(StepOutcome {
                    sub_task_id: result.sub_task_id,
                    definition,
                    status: SubTaskStatus::Completed,
                    processed_result_data: result.result_data,
                    error_details: None,
                    stage_index,
                    dispatch_index,
                })
            }
            SubTaskStatus::Failed => {
                let error_message = result
                    .error_details
                    .clone()
                    .unwrap_or_else(|| "unknown error".into());
                self.record_failure(
                    parent_task_id,
                    stage_index,
                    dispatch_index,
                    definition,
                    result.sub_task_id,
                    error_message,
                    error_records,
                )
                .await
            }
        }
    }

    /// Keeps `content` inline when small, otherwise writes it to the raw
    /// content store and returns a pointer with a truncated preview.
    async fn externalize_if_large(
        &self,
        parent_task_id: &TaskId,
        content: &serde_json::Value,
    ) -> Result<FindingData, OrchestratorError> {
        let serialized = serde_json::to_string(content)?;
        if serialized.len() <= INLINE_FINDING_BYTE_LIMIT {
            return Ok(FindingData::Inline {
                content: content.clone(),
            });
        }

        let hash = crate::memory::content_hash(&serialized);
        self.memory
            .write_raw_content(&parent_task_id.0, &hash, &serialized)
            .await?;
        let preview: String = serialized.chars().take(RAW_CONTENT_PREVIEW_CHARS).collect();

        Ok(FindingData::ReferenceToRawContent {
            raw_content_path: format!("{}/{hash}.json", crate::memory::RAW_CONTENT_DIR),
            preview,
        })
    }

    async fn record_failure(
        &self,
        parent_task_id: &TaskId,
        stage_index: usize,
        dispatch_index: usize,
        definition: crate::types::SubTaskDefinition,
        sub_task_id: crate::types::SubTaskId,
        error_message: String,
        error_records: &mut Vec<ErrorRecord>,
    ) -> Result<StepOutcome, OrchestratorError> {
        let error = ErrorRecord {
            error_id: Uuid::new_v4().to_string(),
            source_step_narrative: definition.narrative_step.clone(),
            source_tool_name: definition.tool_name.clone(),
            error_message: error_message.clone(),
            timestamp: Utc::now(),
        };
        self.memory.add_error_encountered(&parent_task_id.0, &error).await?;
        error_records.push(error);

        Ok(StepOutcome {
            sub_task_id,
            definition,
            status: SubTaskStatus::Failed,
            processed_result_data: None,
            error_details: Some(error_message),
            stage_index,
            dispatch_index,
        })
    }
}
