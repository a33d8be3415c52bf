//! Orchestrator (§4.7): the top-level state machine across the four
//! invocation modes, including the bounded replanning loop.

pub mod cwc;
pub mod journal;
pub mod memory_surface;
pub mod state_file;

use crate::context::{ContextAssembler, ContextSpecification};
use crate::executor::PlanExecutor;
use crate::llm::LanguageModelAdapter;
use crate::memory::MemoryStore;
use crate::planner::PlanManager;
use crate::types::{
    CurrentWorkingContext, ErrorSummary, Mode, Task, TaskRequest, TaskResponse, TaskStatus,
};
use journal::JournalEvent;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Orchestrator {
    memory: Arc<MemoryStore>,
    context_assembler: Arc<ContextAssembler>,
    llm: Arc<dyn LanguageModelAdapter>,
    plan_manager: Arc<PlanManager>,
    executor: Arc<PlanExecutor>,
    max_revisions: u32,
    context_token_budget: usize,
    max_context_key_findings: usize,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemoryStore>,
        context_assembler: Arc<ContextAssembler>,
        llm: Arc<dyn LanguageModelAdapter>,
        plan_manager: Arc<PlanManager>,
        executor: Arc<PlanExecutor>,
        max_revisions: u32,
        context_token_budget: usize,
        max_context_key_findings: usize,
    ) -> Self {
        Self {
            memory,
            context_assembler,
            llm,
            plan_manager,
            executor,
            max_revisions,
            context_token_budget,
            max_context_key_findings,
        }
    }

    /// Entry point mapping 1:1 onto spec §6's `handleUserTask`.
    pub async fn handle_user_task(
        &self,
        req: TaskRequest,
        cancellation: CancellationToken,
    ) -> TaskResponse {
        let result = match req.mode {
            Mode::PlanOnly => self.run_plan_only(&req).await,
            Mode::ExecuteFullPlan => self.run_execute_full_plan(&req, &cancellation).await,
            Mode::ExecutePlannedTask => self.run_execute_planned_task(&req, &cancellation).await,
            Mode::SynthesizeOnly => self.run_synthesize_only(&req).await,
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "handle_user_task failed with an unrecoverable error");
                TaskResponse {
                    success: false,
                    message: format!("critical error: {e}"),
                    original_task: req.user_task.clone(),
                    plan: None,
                    executed_plan: None,
                    final_answer: None,
                    current_working_context: CurrentWorkingContext::empty(),
                    error_summary: Some(ErrorSummary {
                        reason: e.to_string(),
                        failing_step_narrative: None,
                        failing_tool_name: None,
                        failing_error_message: None,
                    }),
                }
            }
        }
    }

    async fn run_plan_only(&self, req: &TaskRequest) -> crate::error::Result<TaskResponse> {
        self.memory.initialize_task_memory(&req.parent_task_id.0).await?;
        memory_surface::persist_task_definition(
            &self.memory,
            &req.parent_task_id.0,
            &req.user_task,
            &req.uploaded_files,
        )
        .await?;
        let mut task = Task::new(req.parent_task_id.clone(), req.user_task.clone(), req.mode);

        let (plan, source) = self.plan_manager.generate_plan(&req.user_task).await?;
        journal::record(&self.memory, &req.parent_task_id.0, JournalEvent::PlanGenerated { source }).await?;

        task.plan = Some(plan.clone());
        task.status = TaskStatus::PlanGenerated;
        state_file::save(&self.memory, &task).await?;

        Ok(TaskResponse {
            success: true,
            message: "plan generated".into(),
            original_task: req.user_task.clone(),
            plan: Some(plan),
            executed_plan: None,
            final_answer: None,
            current_working_context: task.current_working_context,
            error_summary: None,
        })
    }

    async fn run_execute_full_plan(
        &self,
        req: &TaskRequest,
        cancellation: &CancellationToken,
    ) -> crate::error::Result<TaskResponse> {
        self.memory.initialize_task_memory(&req.parent_task_id.0).await?;
        memory_surface::persist_task_definition(
            &self.memory,
            &req.parent_task_id.0,
            &req.user_task,
            &req.uploaded_files,
        )
        .await?;
        let mut task = Task::new(req.parent_task_id.clone(), req.user_task.clone(), req.mode);

        let (plan, source) = self.plan_manager.generate_plan(&req.user_task).await?;
        journal::record(&self.memory, &req.parent_task_id.0, JournalEvent::PlanGenerated { source }).await?;
        task.plan = Some(plan.clone());

        self.execute_with_replanning(&mut task, plan, cancellation).await
    }

    async fn run_execute_planned_task(
        &self,
        req: &TaskRequest,
        cancellation: &CancellationToken,
    ) -> crate::error::Result<TaskResponse> {
        let task_to_load = req
            .task_to_load
            .clone()
            .unwrap_or_else(|| req.parent_task_id.clone());

        let loaded = state_file::load(&self.memory, &task_to_load.0).await?;
        let Some(mut task) = loaded else {
            return Ok(not_found_response(&req.user_task, &task_to_load.0));
        };

        let Some(plan) = task.plan.clone() else {
            return Ok(TaskResponse {
                success: false,
                message: format!("task '{}' has no saved plan to execute", task_to_load.0),
                original_task: task.user_task.clone(),
                plan: None,
                executed_plan: None,
                final_answer: None,
                current_working_context: task.current_working_context.clone(),
                error_summary: None,
            });
        };

        self.execute_with_replanning(&mut task, plan, cancellation).await
    }

    async fn run_synthesize_only(&self, req: &TaskRequest) -> crate::error::Result<TaskResponse> {
        let task_id = req
            .task_to_load
            .clone()
            .unwrap_or_else(|| req.parent_task_id.clone());

        let loaded = state_file::load(&self.memory, &task_id.0).await?;
        let Some(task) = loaded else {
            return Ok(not_found_response(&req.user_task, &task_id.0));
        };

        let final_answer = self.synthesize_final_answer(&task).await?;
        memory_surface::archive_final_answer(&self.memory, &task_id.0, &final_answer).await?;

        Ok(TaskResponse {
            success: true,
            message: "synthesized from existing task memory".into(),
            original_task: task.user_task.clone(),
            plan: task.plan.clone(),
            executed_plan: None,
            final_answer: Some(final_answer),
            current_working_context: task.current_working_context.clone(),
            error_summary: None,
        })
    }

    /// Runs the stage-by-stage execution of `plan`, replanning up to
    /// `max_revisions` times on failure before giving up (§4.7).
    async fn execute_with_replanning(
        &self,
        task: &mut Task,
        mut plan: crate::types::Plan,
        cancellation: &CancellationToken,
    ) -> crate::error::Result<TaskResponse> {
        loop {
            let report = self.executor.execute(&task.parent_task_id, &plan, cancellation).await?;
            task.execution_context.extend(report.execution_context.clone());
            memory_surface::write_execution_log_summary(
                &self.memory,
                &task.parent_task_id.0,
                &task.execution_context,
            )
            .await?;

            if report.success {
                journal::record(&self.memory, &task.parent_task_id.0, JournalEvent::TaskCompleted).await?;

                task.current_working_context = cwc::update_cwc(
                    &self.memory,
                    &self.context_assembler,
                    self.llm.as_ref(),
                    task,
                    &report.execution_context,
                    self.context_token_budget,
                    self.max_context_key_findings,
                )
                .await?;
                journal::record(&self.memory, &task.parent_task_id.0, JournalEvent::CwcUpdated).await?;

                let final_answer = self.synthesize_final_answer(task).await?;
                memory_surface::archive_final_answer(&self.memory, &task.parent_task_id.0, &final_answer).await?;
                task.status = TaskStatus::Completed;
                task.final_answer = Some(final_answer.clone());
                state_file::save(&self.memory, task).await?;

                return Ok(TaskResponse {
                    success: true,
                    message: "task completed".into(),
                    original_task: task.user_task.clone(),
                    plan: task.plan.clone(),
                    executed_plan: Some(plan),
                    final_answer: Some(final_answer),
                    current_working_context: task.current_working_context.clone(),
                    error_summary: None,
                });
            }

            let failed = report.failed_step_details.expect("failed execution must report a failed step");
            journal::record(
                &self.memory,
                &task.parent_task_id.0,
                JournalEvent::ExecutionFailed { failed_step: failed.clone() },
            )
            .await?;

            if task.revision_attempt >= self.max_revisions {
                warn!(
                    parent_task_id = %task.parent_task_id,
                    revision_attempt = task.revision_attempt,
                    "exhausted replanning attempts"
                );
                memory_surface::append_key_decision(
                    &self.memory,
                    &task.parent_task_id.0,
                    &format!(
                        "gave up after {} replanning attempt(s); last failure: '{}' via '{}': {}",
                        task.revision_attempt, failed.narrative_step, failed.tool_name, failed.error_message
                    ),
                )
                .await?;
                task.status = TaskStatus::FailedExecution;
                task.error_summary = Some(ErrorSummary {
                    reason: "execution failed after exhausting replanning attempts".into(),
                    failing_step_narrative: Some(failed.narrative_step.clone()),
                    failing_tool_name: Some(failed.tool_name.clone()),
                    failing_error_message: Some(failed.error_message.clone()),
                });
                state_file::save(&self.memory, task).await?;

                return Ok(TaskResponse {
                    success: false,
                    message: "execution failed after exhausting replanning attempts".into(),
                    original_task: task.user_task.clone(),
                    plan: task.plan.clone(),
                    executed_plan: Some(plan),
                    final_answer: None,
                    current_working_context: task.current_working_context.clone(),
                    error_summary: task.error_summary.clone(),
                });
            }

            task.revision_attempt += 1;
            journal::record(
                &self.memory,
                &task.parent_task_id.0,
                JournalEvent::ReplanAttempted { attempt: task.revision_attempt },
            )
            .await?;
            memory_surface::append_key_decision(
                &self.memory,
                &task.parent_task_id.0,
                &format!(
                    "replanning (attempt {}) after '{}' via '{}' failed: {}",
                    task.revision_attempt, failed.narrative_step, failed.tool_name, failed.error_message
                ),
            )
            .await?;

            let failure_context = format!(
                "Step '{}' using tool '{}' failed: {}",
                failed.narrative_step, failed.tool_name, failed.error_message
            );
            let (revised_plan, source) = self
                .plan_manager
                .revise_plan(&task.user_task, &failure_context)
                .await?;
            journal::record(&self.memory, &task.parent_task_id.0, JournalEvent::PlanGenerated { source }).await?;

            plan = revised_plan.clone();
            task.plan = Some(revised_plan);
            state_file::save(&self.memory, task).await?;
        }
    }

    async fn synthesize_final_answer(&self, task: &Task) -> crate::error::Result<String> {
        let execution_context: Vec<String> = task
            .execution_context
            .iter()
            .map(|outcome| {
                format!(
                    "[{}] {} -> {:?}",
                    outcome.dispatch_index, outcome.definition.narrative_step, outcome.status
                )
            })
            .collect();

        let key_findings = self
            .memory
            .get_latest_key_findings(&task.parent_task_id.0, self.max_context_key_findings)
            .await?;

        let spec = ContextSpecification {
            system_prompt: "Synthesize a final answer for the user from the task's execution context.".into(),
            original_user_task: task.user_task.clone(),
            current_progress_summary: task.current_working_context.summary_of_progress.clone(),
            current_next_objective: task.current_working_context.next_objective.clone(),
            execution_context,
            key_findings,
            max_latest_key_findings: self.max_context_key_findings,
            parent_task_id: task.parent_task_id.0.clone(),
            include_raw_content_for_referenced_findings: true,
            token_budget: self.context_token_budget,
            enable_mega_context_cache: true,
            mega_context_cache_ttl_seconds: Some(300),
            ..Default::default()
        };

        let prompt = self.context_assembler.assemble(&spec).await?;
        // Offer the adapter a chance to pre-cache the assembled context
        // provider-side (§4.3, §9 "Mega-context cache hints"); adapters that
        // don't support it return None and the call below proceeds exactly
        // as a plain `generate_text`.
        let cache_handle = self.llm.prepare_context_for_model(
            &[prompt.clone()],
            spec.enable_mega_context_cache,
            spec.mega_context_cache_ttl_seconds,
        );
        let params = crate::llm::GenerationParams {
            cache_handle,
            ..Default::default()
        };
        let answer = self.llm.generate_text_with_params(&prompt, &params).await?;
        Ok(answer)
    }
}

fn not_found_response(user_task: &str, task_id: &str) -> TaskResponse {
    TaskResponse {
        success: false,
        message: format!("no task found with id '{task_id}'"),
        original_task: user_task.to_string(),
        plan: None,
        executed_plan: None,
        final_answer: None,
        current_working_context: CurrentWorkingContext::empty(),
        error_summary: Some(ErrorSummary {
            reason: format!("task '{task_id}' not found"),
            failing_step_narrative: None,
            failing_tool_name: None,
            failing_error_message: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::context::word_count_tokenizer;
    use crate::dispatch::ResultRouter;
    use crate::llm::TestAdapter;
    use crate::planner::PlanManager;
    use crate::types::{SubTaskResult, TaskId};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn template_json() -> &'static str {
        r#"[[{"assigned_agent_role":"researcher","tool_name":"search","sub_task_input":{},"narrative_step":"look it up"}]]"#
    }

    async fn build_orchestrator(
        adapter: Arc<TestAdapter>,
    ) -> (Orchestrator, mpsc::Sender<crate::types::SubTaskMessage>) {
        let tmp = tempfile::tempdir().unwrap();
        let memory = Arc::new(MemoryStore::new(tmp.path(), 1000));
        let context_assembler = Arc::new(ContextAssembler::with_memory(
            word_count_tokenizer(),
            (*memory).clone(),
        ));
        let plan_manager = Arc::new(PlanManager::new(vec![], Capabilities::default(), adapter.clone()));

        let (sub_tx, sub_rx) = mpsc::channel(8);
        let (res_tx, res_rx) = mpsc::channel(8);
        let router = Arc::new(ResultRouter::new());
        let router_bg = router.clone();
        tokio::spawn(async move { router_bg.run(res_rx).await });

        let mut senders = HashMap::new();
        senders.insert("researcher".to_string(), sub_tx.clone());
        let executor = Arc::new(PlanExecutor::new(senders, router, (*memory).clone(), Duration::from_secs(5)));

        tokio::spawn(async move {
            let mut rx = sub_rx;
            while let Some(msg) = rx.recv().await {
                let _ = res_tx
                    .send(SubTaskResult::success(msg.sub_task_id, serde_json::json!({"ok": true})))
                    .await;
            }
        });

        let orchestrator = Orchestrator::new(
            memory,
            context_assembler,
            adapter,
            plan_manager,
            executor,
            2,
            10_000,
            10,
        );
        (orchestrator, sub_tx)
    }

    #[tokio::test]
    async fn execute_full_plan_succeeds_end_to_end() {
        let adapter = Arc::new(TestAdapter::new("test"));
        adapter.queue_response(template_json());
        adapter.queue_response(r#"{"summary_of_progress":"done","next_objective":"none","confidence_score":0.9,"identified_entities":[],"pending_questions":[]}"#); // CWC update
        adapter.queue_response("final answer text");
        let (orchestrator, _sub_tx) = build_orchestrator(adapter).await;

        let req = TaskRequest {
            user_task: "research something".into(),
            uploaded_files: vec![],
            parent_task_id: TaskId::new(),
            task_to_load: None,
            mode: Mode::ExecuteFullPlan,
        };

        let response = orchestrator.handle_user_task(req, CancellationToken::new()).await;
        assert!(response.success);
        assert_eq!(response.final_answer.as_deref(), Some("final answer text"));
    }

    #[tokio::test]
    async fn synthesize_only_on_absent_task_fails_gracefully() {
        let adapter = Arc::new(TestAdapter::new("test"));
        let (orchestrator, _sub_tx) = build_orchestrator(adapter).await;

        let req = TaskRequest {
            user_task: "whatever".into(),
            uploaded_files: vec![],
            parent_task_id: TaskId::from("never-existed"),
            task_to_load: None,
            mode: Mode::SynthesizeOnly,
        };

        let response = orchestrator.handle_user_task(req, CancellationToken::new()).await;
        assert!(!response.success);
        assert!(response.error_summary.is_some());
    }
}
