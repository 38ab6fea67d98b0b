//! Workflow domain types
//!
//! A workflow is declared once as an immutable [`WorkflowDefinition`]:
//! a pattern (sequential, parallel, feedback loop, conditional,
//! competitive, handoff, human-loop or general graph), the steps it
//! coordinates, the agent roles those steps need, and the variables a
//! caller must supply.
//!
//! At run time an execution owns an [`ExecutionSnapshot`]: variable
//! bindings, step outputs, the step-status table, typed edge states and
//! per-loop iteration counters. Every durable transition of that snapshot
//! is persisted as a [`Checkpoint`].
//!
//! # Step lifecycle
//!
//! ```text
//! pending -> ready -> running (waiting) -> succeeded | failed | skipped | cancelled
//! ```
//!
//! Status only moves forward. The two sanctioned exceptions are loop
//! re-entry (the looped subgraph returns to `pending`) and crash recovery
//! (an in-flight step returns to `ready`).

#![deny(unsafe_code)]

pub mod checkpoint;
pub mod definition;
pub mod edge;
pub mod error;
pub mod execution;
pub mod status;
pub mod step;

pub use checkpoint::{Checkpoint, CheckpointId};
pub use definition::{
    AgentId, AgentRole, ConditionalBranch, JoinPolicy, Pattern, RoleId, VariableSpec,
    WorkflowDefinition, WorkflowDefinitionId,
};
pub use edge::{Edge, EdgeKind, EdgeState};
pub use error::{ErrorKind, StepError, WorkflowError, WorkflowResult};
pub use execution::{
    ExecutionFailure, ExecutionId, ExecutionSnapshot, ExecutionStatus, StepState, StepSummary,
};
pub use status::{ExecutionState, StepStatus};
pub use step::{
    Backoff, FailurePolicy, HttpMethod, RetryPolicy, StepId, StepKind, StepSpec, Transform,
};
