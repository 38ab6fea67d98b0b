//! Execution state: the mutable context of one run
//!
//! An [`ExecutionSnapshot`] is owned by exactly one scheduler task. Every
//! status change goes through [`ExecutionSnapshot::advance`], which
//! refuses backward moves; the only regressions are
//! [`reset_for_loop`](ExecutionSnapshot::reset_for_loop) and
//! [`requeue_in_flight`](ExecutionSnapshot::requeue_in_flight).

use crate::{
    AgentId, ErrorKind, ExecutionState, RoleId, StepError, StepId, StepStatus,
    WorkflowDefinitionId, WorkflowError, WorkflowResult, EdgeState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Unique identifier for an execution
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Step State ───────────────────────────────────────────────────────

/// Per-step row of the status table
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub status: StepStatus,
    /// Attempts made in the current generation
    pub attempts: u32,
    /// Dispatch generation; completions from older generations are stale
    pub generation: u64,
    /// Input forced by loop re-entry or a branch failure policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reentry_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Why an execution failed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    /// Originating step, absent for execution-level failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn at_step(step_id: StepId, error: &StepError) -> Self {
        Self {
            step_id: Some(step_id),
            kind: error.kind,
            message: error.message.clone(),
        }
    }

    pub fn execution(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step_id: None,
            kind,
            message: message.into(),
        }
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// Full mutable state of one execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: ExecutionId,
    pub definition_id: WorkflowDefinitionId,
    pub state: ExecutionState,
    /// Variable bindings; step outputs with an output binding land here too
    pub vars: Map<String, Value>,
    /// Output of every step that has produced one
    pub outputs: BTreeMap<StepId, Value>,
    pub steps: BTreeMap<StepId, StepState>,
    /// Traversal state, index-aligned with the compiled graph's edges
    pub edges: Vec<EdgeState>,
    /// Iteration counter per loop head
    pub iterations: BTreeMap<StepId, u32>,
    pub role_bindings: BTreeMap<RoleId, AgentId>,
    /// Incremented on every durable transition
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall-clock budget expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl ExecutionSnapshot {
    pub fn new<'a>(
        execution_id: ExecutionId,
        definition_id: WorkflowDefinitionId,
        step_ids: impl IntoIterator<Item = &'a StepId>,
        edge_count: usize,
        vars: Map<String, Value>,
        role_bindings: BTreeMap<RoleId, AgentId>,
    ) -> Self {
        Self {
            execution_id,
            definition_id,
            state: ExecutionState::Running,
            vars,
            outputs: BTreeMap::new(),
            steps: step_ids
                .into_iter()
                .map(|id| (id.clone(), StepState::default()))
                .collect(),
            edges: vec![EdgeState::Pending; edge_count],
            iterations: BTreeMap::new(),
            role_bindings,
            sequence: 0,
            output: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn step(&self, id: &StepId) -> Option<&StepState> {
        self.steps.get(id)
    }

    pub fn step_mut(&mut self, id: &StepId) -> WorkflowResult<&mut StepState> {
        self.steps
            .get_mut(id)
            .ok_or_else(|| WorkflowError::StepNotFound(id.clone()))
    }

    pub fn status_of(&self, id: &StepId) -> Option<StepStatus> {
        self.steps.get(id).map(|s| s.status)
    }

    /// Move a step forward through the status table
    pub fn advance(&mut self, id: &StepId, next: StepStatus) -> WorkflowResult<()> {
        let state = self.step_mut(id)?;
        if !state.status.can_advance_to(next) {
            return Err(WorkflowError::InvalidTransition {
                step: id.clone(),
                from: state.status,
                to: next,
            });
        }
        match next {
            StepStatus::Running if state.started_at.is_none() => {
                state.started_at = Some(Utc::now());
            }
            s if s.is_terminal() => state.finished_at = Some(Utc::now()),
            _ => {}
        }
        state.status = next;
        Ok(())
    }

    /// Return a looped subgraph to `pending` for the next iteration
    pub fn reset_for_loop<'a>(&mut self, ids: impl IntoIterator<Item = &'a StepId>) {
        for id in ids {
            if let Some(state) = self.steps.get_mut(id) {
                state.status = StepStatus::Pending;
                state.attempts = 0;
                state.generation += 1;
                state.reentry_input = None;
                state.error = None;
                state.started_at = None;
                state.finished_at = None;
            }
        }
    }

    /// Return every in-flight step to `ready`; used when resuming from a checkpoint
    pub fn requeue_in_flight(&mut self) -> Vec<StepId> {
        let mut requeued = Vec::new();
        for (id, state) in self.steps.iter_mut() {
            if state.status.is_in_flight() {
                state.status = StepStatus::Ready;
                state.generation += 1;
                requeued.push(id.clone());
            }
        }
        requeued
    }

    /// Record a step's output, binding it to a context variable when named
    pub fn bind_output(&mut self, id: &StepId, value: Value, output_var: Option<&str>) {
        if let Some(var) = output_var {
            self.vars.insert(var.to_string(), value.clone());
        }
        self.outputs.insert(id.clone(), value);
    }

    /// Step IDs currently in `status`, in ID order
    pub fn steps_with(&self, status: StepStatus) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|(_, s)| s.status == status)
            .map(|(id, _)| id.clone())
            .collect()
    }


    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Step outputs as a JSON object keyed by step ID
    pub fn outputs_object(&self) -> Value {
        Value::Object(
            self.outputs
                .iter()
                .map(|(id, v)| (id.0.clone(), v.clone()))
                .collect(),
        )
    }

    /// Mark the execution terminal
    pub fn finish(&mut self, state: ExecutionState, failure: Option<ExecutionFailure>) {
        self.state = state;
        self.failure = failure;
        self.finished_at = Some(Utc::now());
    }

    /// Caller-facing view of the snapshot
    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus {
            execution_id: self.execution_id.clone(),
            definition_id: self.definition_id.clone(),
            state: self.state,
            steps: self
                .steps
                .iter()
                .map(|(id, s)| {
                    (
                        id.clone(),
                        StepSummary {
                            status: s.status,
                            attempts: s.attempts,
                            error: s.error.clone(),
                        },
                    )
                })
                .collect(),
            output: self.output.clone(),
            failure: self.failure.clone(),
            sequence: self.sequence,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

// ── Status view ──────────────────────────────────────────────────────

/// One row of the published status table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// What status queries return
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: ExecutionId,
    pub definition_id: WorkflowDefinitionId,
    pub state: ExecutionState,
    pub steps: BTreeMap<StepId, StepSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionStatus {
    pub fn step_status(&self, id: &str) -> Option<StepStatus> {
        self.steps.get(&StepId::new(id)).map(|s| s.status)
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.steps
            .get(&StepId::new(id))
            .map(|s| s.attempts)
            .unwrap_or(0)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
