//! Crate-wide error types.
//!
//! Every component has a focused error enum; `OrchestratorError` aggregates
//! them for the public API surface (`handle_user_task` and friends).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised by the Memory Store (§4.1).
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("memory corrupt: {0}")]
    Corrupt(String),

    #[error("memory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the Context Assembler (§4.2).
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("preamble and postamble alone exceed the token budget ({used} > {limit})")]
    BudgetExceededByFraming { used: usize, limit: usize },

    #[error("critical section '{0}' does not fit within the token budget")]
    CriticalSectionDoesNotFit(String),

    #[error(
        "assembled context ({assembled} tokens) exceeds the budget ({limit} tokens) after assembly"
    )]
    AssembledContextTooLarge { assembled: usize, limit: usize },

    #[error("memory store error while assembling context: {0}")]
    Memory(#[from] MemoryError),
}

/// Errors raised by the Language-Model Adapter (§4.3).
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("invalid response from model: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("model unavailable after exhausting retries: {0}")]
    ModelUnavailable(String),
}

impl LlmError {
    /// Whether this error is the kind the retry policy in §4.3 should retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::ServiceUnavailable(_) | LlmError::Network(_)
        )
    }
}

/// Errors raised by the Plan Manager (§4.6).
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("plan generation failed: {message}")]
    GenerationFailed {
        message: String,
        raw_response: Option<String>,
    },

    #[error("plan schema validation failed: {0}")]
    SchemaInvalid(String),

    #[error("model error while generating plan: {0}")]
    Llm(#[from] LlmError),
}

/// Errors raised by the Sub-Task Dispatch layer (§4.4).
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("sub-task channel closed while dispatching")]
    ChannelClosed,

    #[error("sub-task {0} timed out")]
    Timeout(uuid::Uuid),
}

/// Top-level error type returned from orchestrator-facing operations.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("planning failed: {0}")]
    PlanningFailed(#[from] PlanError),

    #[error("sub-task failed: {source_step_narrative} ({source_tool_name}): {error_message}")]
    SubTaskFailed {
        source_step_narrative: String,
        source_tool_name: String,
        error_message: String,
    },

    #[error("sub-task timed out: {source_step_narrative} ({source_tool_name})")]
    SubTaskTimeout {
        source_step_narrative: String,
        source_tool_name: String,
    },

    #[error("context assembly failed: {0}")]
    ContextAssemblyFailed(#[from] ContextError),

    #[error("memory I/O error: {0}")]
    MemoryIo(MemoryError),

    #[error("memory corrupt: {0}")]
    MemoryCorrupt(String),

    #[error("model transient error: {0}")]
    ModelTransient(LlmError),

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("critical error: {0}")]
    CriticalError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<MemoryError> for OrchestratorError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Corrupt(msg) => OrchestratorError::MemoryCorrupt(msg),
            other => OrchestratorError::MemoryIo(other),
        }
    }
}

impl From<LlmError> for OrchestratorError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ModelUnavailable(msg) => OrchestratorError::ModelUnavailable(msg),
            other => OrchestratorError::ModelTransient(other),
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::CriticalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_transience() {
        assert!(LlmError::RateLimited("x".into()).is_transient());
        assert!(LlmError::ServiceUnavailable("x".into()).is_transient());
        assert!(!LlmError::AuthFailed("x".into()).is_transient());
        assert!(!LlmError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn memory_error_maps_corrupt_distinctly() {
        let err: OrchestratorError = MemoryError::Corrupt("bad json".into()).into();
        assert!(matches!(err, OrchestratorError::MemoryCorrupt(_)));

        let err: OrchestratorError = MemoryError::NotFound("x".into()).into();
        assert!(matches!(err, OrchestratorError::MemoryIo(_)));
    }
}
