//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use workflow_engine::{
    AgentExecutor, CheckpointStore, CollaboratorError, CollaboratorResult, EngineConfig,
    InMemoryCheckpointStore, StoreResult, WorkflowEngine,
};
use workflow_types::{
    AgentId, Checkpoint, ExecutionId, ExecutionStatus, StepId, StepStatus,
};

/// What a scripted agent does for one task
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Reply with the numeric input plus one
    AddOne,
    /// Sleep, then reply with a fixed value
    Sleep { ms: u64, reply: Value },
    /// Sleep past any short timeout on the first `slow` calls, then reply
    SlowFirst { slow: u32, ms: u64, reply: Value },
    /// Reply `{"score": n}` where n counts calls to this task
    Counter,
    /// Always fail
    Fail(String),
    /// Panic inside the collaborator
    Panic,
}

/// Agent executor driven by per-task behaviors
///
/// Every sleep observes the cancellation token. Calls are counted per task,
/// and the highest number of simultaneous calls is recorded.
#[derive(Default)]
pub struct ScriptedAgent {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the active-call gauge when an invocation ends
struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, task: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(task.to_string(), behavior);
        self
    }

    pub fn calls(&self, task: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(task)
            .copied()
            .unwrap_or(0)
    }

    /// Most invocations that were ever in progress at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveCall<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveCall(&self.active)
    }
}

async fn sleep_or_cancel(ms: u64, cancel: &CancellationToken) -> Result<(), CollaboratorError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CollaboratorError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    async fn invoke(
        &self,
        _agent: &AgentId,
        payload: Value,
        _deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> CollaboratorResult {
        let _active = self.enter();
        let task = payload["task"].as_str().unwrap_or_default().to_string();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(task.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match self.behaviors.get(&task).cloned() {
            Some(Behavior::AddOne) => {
                let n = payload["input"].as_i64().unwrap_or(0);
                Ok(json!(n + 1))
            }
            Some(Behavior::Sleep { ms, reply }) => {
                sleep_or_cancel(ms, &cancel).await?;
                Ok(reply)
            }
            Some(Behavior::SlowFirst { slow, ms, reply }) => {
                if call <= slow {
                    sleep_or_cancel(ms, &cancel).await?;
                }
                Ok(reply)
            }
            Some(Behavior::Counter) => Ok(json!({ "score": call })),
            Some(Behavior::Fail(message)) => Err(CollaboratorError::Failed(message)),
            Some(Behavior::Panic) => panic!("agent crashed on task '{}'", task),
            None => Err(CollaboratorError::Failed(format!("no behavior for task '{}'", task))),
        }
    }
}

/// Store that also keeps every checkpoint ever written, for inspection
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryCheckpointStore,
    history: Mutex<Vec<Checkpoint>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Checkpoint> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointStore for RecordingStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        self.history.lock().unwrap().push(checkpoint.clone());
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn load_latest_checkpoint(&self, execution: &ExecutionId) -> StoreResult<Option<Checkpoint>> {
        self.inner.load_latest_checkpoint(execution).await
    }

    async fn list_checkpoints(&self, execution: &ExecutionId) -> StoreResult<Vec<u64>> {
        self.inner.list_checkpoints(execution).await
    }

    async fn prune(&self, execution: &ExecutionId, keep: usize) -> StoreResult<usize> {
        self.inner.prune(execution, keep).await
    }

    async fn delete(&self, execution: &ExecutionId) -> StoreResult<()> {
        self.inner.delete(execution).await
    }

    async fn list_executions(&self) -> StoreResult<Vec<ExecutionId>> {
        self.inner.list_executions().await
    }
}

/// Engine with test limits, the given agent and one capable agent registered
pub fn engine_with(agent: Arc<ScriptedAgent>) -> WorkflowEngine {
    engine_with_config(agent, EngineConfig::testing())
}

pub fn engine_with_config(agent: Arc<ScriptedAgent>, config: EngineConfig) -> WorkflowEngine {
    let engine = WorkflowEngine::builder()
        .with_config(config)
        .with_agent_executor(agent)
        .build();
    engine
        .capabilities()
        .register(AgentId::new("worker-1"), ["compute", "review"]);
    engine
}

pub fn vars(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Poll until `check` holds for the execution's status, or panic after 5s
pub async fn wait_until(
    engine: &WorkflowEngine,
    execution: &ExecutionId,
    check: impl Fn(&ExecutionStatus) -> bool,
) -> ExecutionStatus {
    let started = Instant::now();
    loop {
        let status = engine.status(execution).await.expect("status");
        if check(&status) {
            return status;
        }
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "condition not reached; last status: {:?}",
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn step_is(status: &ExecutionStatus, step: &str, expected: StepStatus) -> bool {
    status.steps.get(&StepId::new(step)).map(|s| s.status) == Some(expected)
}
