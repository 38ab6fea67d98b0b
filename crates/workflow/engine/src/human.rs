//! Human signal endpoint
//!
//! A `human_input` step parks on a oneshot channel registered here under
//! its execution and step id. Supplying a value resolves the channel; the
//! registration disappears when the step stops waiting for any reason.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;
use workflow_types::{ExecutionId, StepId, WorkflowError, WorkflowResult};

type Key = (ExecutionId, StepId);

/// Pending human inputs across all executions
#[derive(Debug, Clone, Default)]
pub struct HumanInputHub {
    pending: Arc<DashMap<Key, oneshot::Sender<Value>>>,
}

/// Removes a registration when the waiting step goes away
#[derive(Debug)]
pub struct PendingInput {
    key: Key,
    pending: Arc<DashMap<Key, oneshot::Sender<Value>>>,
}

impl Drop for PendingInput {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

impl HumanInputHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for input addressed to `(execution, step)`
    pub fn register(
        &self,
        execution: &ExecutionId,
        step: &StepId,
    ) -> (oneshot::Receiver<Value>, PendingInput) {
        let (tx, rx) = oneshot::channel();
        let key = (execution.clone(), step.clone());
        self.pending.insert(key.clone(), tx);
        (
            rx,
            PendingInput {
                key,
                pending: self.pending.clone(),
            },
        )
    }

    /// Deliver a value to a waiting step
    pub fn supply(&self, execution: &ExecutionId, step: &StepId, value: Value) -> WorkflowResult<()> {
        let not_waiting = || WorkflowError::StepNotWaiting {
            execution: execution.clone(),
            step: step.clone(),
        };

        let (_, tx) = self
            .pending
            .remove(&(execution.clone(), step.clone()))
            .ok_or_else(not_waiting)?;
        tx.send(value).map_err(|_| not_waiting())?;

        tracing::info!(execution_id = %execution, step_id = %step, "Human input supplied");
        Ok(())
    }

    pub fn is_waiting(&self, execution: &ExecutionId, step: &StepId) -> bool {
        self.pending.contains_key(&(execution.clone(), step.clone()))
    }

    /// Number of steps currently waiting
    pub fn waiting_count(&self) -> usize {
        self.pending.len()
    }
}
