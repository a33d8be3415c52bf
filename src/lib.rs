//! Agent Orchestrator Core
//!
//! A multi-agent task orchestrator: given a task and a set of worker
//! collaborators it never spawns itself, this crate produces a plan,
//! dispatches it stage by stage, accumulates durable per-task memory, and
//! replans within a bounded number of attempts when a stage fails.
//!
//! # Architecture
//!
//! - **Types**: the Task/Plan/Stage/StepOutcome data model (`types`)
//! - **Memory**: a per-task filesystem memory bank with a summary cache (`memory`)
//! - **Context**: a token-budgeted mega-context assembler (`context`)
//! - **LLM**: the abstract `LanguageModelAdapter` contract (`llm`)
//! - **Dispatch**: sub-task/result channels and the result router (`dispatch`)
//! - **Executor**: stage-by-stage plan execution (`executor`)
//! - **Planner**: template-first, model-fallback plan generation (`planner`)
//! - **Orchestrator**: the four-mode state machine and replanning loop (`orchestrator`)

pub mod capabilities;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod types;

pub use capabilities::{Capabilities, RoleDefinition, ToolDefinition};
pub use config::AppConfig;
pub use context::{ContextAssembler, ContextSpecification};
pub use dispatch::ResultRouter;
pub use error::{OrchestratorError, Result};
pub use executor::{ExecutionReport, PlanExecutor};
pub use llm::{LanguageModelAdapter, TestAdapter};
pub use memory::{MemoryStore, SummarizableRecord, SummarizeOptions};
pub use orchestrator::Orchestrator;
pub use planner::PlanManager;
pub use types::{
    CurrentWorkingContext, ErrorRecord, ErrorSummary, KeyFinding, Mode, Plan, Stage,
    SubTaskDefinition, SubTaskId, SubTaskMessage, SubTaskResult, Task, TaskId, TaskRequest,
    TaskResponse, TaskStatus,
};
