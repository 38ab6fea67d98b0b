//! Error taxonomy
//!
//! [`WorkflowError`] is what callers of the engine see: validation
//! failures raised before dispatch, lookups that miss, persistence
//! failures. [`StepError`] is step-local; it is absorbed by the step's
//! failure policy and only surfaces as the `kind` of an execution failure.

use crate::{AgentId, ExecutionId, RoleId, StepId, StepStatus, WorkflowDefinitionId};
use serde::{Deserialize, Serialize};

/// Errors that can occur in workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Duplicate step ID: {0}")]
    DuplicateStepId(StepId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Duplicate edge: {from} -> {to}")]
    DuplicateEdge { from: StepId, to: StepId },

    #[error("Step {step} references undeclared role '{role}'")]
    UndeclaredRole { step: StepId, role: RoleId },

    #[error("Missing required variable: {0}")]
    MissingVariable(String),

    #[error("Cycle through step {0} is not declared as a loop-back edge")]
    CyclicGraph(StepId),

    #[error("Step {0} is not reachable from the entry step")]
    UnreachableStep(StepId),

    #[error("Invalid expression in {location}: {message}")]
    InvalidExpression { location: String, message: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error("Agent {agent} does not satisfy role '{role}'")]
    UnsatisfiedRole { role: RoleId, agent: AgentId },

    #[error("No registered agent satisfies role '{0}'")]
    NoEligibleAgent(RoleId),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status transition for step {step}: {from} -> {to}")]
    InvalidTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Step {step} of execution {execution} is not waiting for input")]
    StepNotWaiting { execution: ExecutionId, step: StepId },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Whether this error rejects a submission before anything is dispatched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStepId(_)
                | Self::StepNotFound(_)
                | Self::DuplicateEdge { .. }
                | Self::UndeclaredRole { .. }
                | Self::MissingVariable(_)
                | Self::CyclicGraph(_)
                | Self::UnreachableStep(_)
                | Self::InvalidExpression { .. }
                | Self::AgentNotFound(_)
                | Self::UnsatisfiedRole { .. }
                | Self::NoEligibleAgent(_)
                | Self::ValidationError(_)
        )
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

// ── Step-local errors ────────────────────────────────────────────────

/// Classification of a step or execution failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Timeout,
    Executor,
    AmbiguousBranch,
    Cancelled,
    Expression,
    Persistence,
}

impl ErrorKind {
    /// Only collaborator failures and deadline misses are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Executor)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Executor => "executor",
            Self::AmbiguousBranch => "ambiguous_branch",
            Self::Cancelled => "cancelled",
            Self::Expression => "expression",
            Self::Persistence => "persistence",
        };
        f.write_str(s)
    }
}

/// A failure produced while running a single step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn executor(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Executor, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "step cancelled")
    }

    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AmbiguousBranch, message)
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expression, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Executor.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
        assert!(!ErrorKind::AmbiguousBranch.is_retryable());
        assert!(!ErrorKind::Expression.is_retryable());
    }

    #[test]
    fn test_step_error_display() {
        let err = StepError::timeout("no reply within 50ms");
        assert_eq!(err.to_string(), "timeout: no reply within 50ms");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_classification() {
        assert!(WorkflowError::MissingVariable("x".into()).is_validation());
        assert!(WorkflowError::AgentNotFound(AgentId::new("a")).is_validation());
        assert!(!WorkflowError::Persistence("disk full".into()).is_validation());
        assert!(!WorkflowError::ExecutionNotFound(ExecutionId::new("e")).is_validation());
    }

    #[test]
    fn test_error_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::AmbiguousBranch).unwrap();
        assert_eq!(json, "\"ambiguous_branch\"");
    }
}
