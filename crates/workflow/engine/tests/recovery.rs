//! Checkpointing, recovery and retention

mod common;

use common::{vars, Behavior, RecordingStore, ScriptedAgent};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use workflow_engine::{
    CheckpointStore, EngineConfig, InMemoryCheckpointStore, StorageConfig, WorkflowEngine,
};
use workflow_types::{
    AgentId, AgentRole, ExecutionState, Pattern, StepId, StepSpec, StepStatus, Transform,
    WorkflowDefinition,
};

fn pipeline() -> WorkflowDefinition {
    WorkflowDefinition::new("pipeline", Pattern::Sequential)
        .with_id("pipeline-v1")
        .with_role(AgentRole::new("worker").requires("compute"))
        .with_step(StepSpec::agent("a", "worker", "a"))
        .with_step(StepSpec::agent("b", "worker", "b"))
        .with_step(StepSpec::agent("c", "worker", "c"))
}

fn counting_agent() -> Arc<ScriptedAgent> {
    Arc::new(
        ScriptedAgent::new()
            .on("a", Behavior::AddOne)
            .on("b", Behavior::AddOne)
            .on("c", Behavior::AddOne),
    )
}

fn engine(agent: Arc<ScriptedAgent>, store: Arc<dyn CheckpointStore>) -> WorkflowEngine {
    let mut config = EngineConfig::testing();
    config.retention.checkpoint_keep = 1_000;
    let engine = WorkflowEngine::builder()
        .with_config(config)
        .with_agent_executor(agent)
        .with_store(store)
        .build();
    engine
        .capabilities()
        .register(AgentId::new("worker-1"), ["compute"]);
    engine
}

#[tokio::test]
async fn recovery_does_not_rerun_succeeded_steps() {
    let recording = Arc::new(RecordingStore::new());
    let first = engine(counting_agent(), recording.clone());
    let def_id = first.register_definition(pipeline()).await.unwrap();

    let exec = first
        .submit(&def_id, vars(json!({"input": 10})), BTreeMap::new())
        .await
        .unwrap();
    let finished = first.wait(&exec).await.unwrap();
    assert_eq!(finished.output, Some(json!(13)));

    // simulate a crash right after `b` was dispatched
    let crash_point = recording
        .history()
        .into_iter()
        .find(|cp| {
            cp.snapshot.status_of(&StepId::new("a")) == Some(StepStatus::Succeeded)
                && cp.snapshot.status_of(&StepId::new("b")) == Some(StepStatus::Running)
        })
        .expect("a checkpoint with b in flight");

    let store = Arc::new(InMemoryCheckpointStore::new());
    store.save_checkpoint(&crash_point).await.unwrap();

    let agent = counting_agent();
    let second = engine(agent.clone(), store.clone());
    second.register_definition(pipeline()).await.unwrap();

    second.recover(&exec).await.unwrap();
    // recovering a live execution again changes nothing
    second.recover(&exec).await.unwrap();
    let recovered = second.wait(&exec).await.unwrap();

    assert_eq!(recovered.state, ExecutionState::Completed);
    assert_eq!(recovered.output, finished.output);
    assert_eq!(agent.calls("a"), 0);
    assert_eq!(agent.calls("b"), 1);
    assert_eq!(agent.calls("c"), 1);

    let sequences = store.list_checkpoints(&exec).await.unwrap();
    assert!(sequences.first().copied().unwrap_or(0) >= crash_point.sequence);
}

#[tokio::test]
async fn checkpoint_sequences_strictly_increase() {
    let recording = Arc::new(RecordingStore::new());
    let engine = engine(counting_agent(), recording.clone());
    let def_id = engine.register_definition(pipeline()).await.unwrap();

    let exec = engine
        .submit(&def_id, vars(json!({"input": 0})), BTreeMap::new())
        .await
        .unwrap();
    engine.wait(&exec).await.unwrap();

    let sequences: Vec<u64> = recording.history().iter().map(|cp| cp.sequence).collect();
    assert!(sequences.len() > 3);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn recover_unknown_execution_fails() {
    let engine = engine(counting_agent(), Arc::new(InMemoryCheckpointStore::new()));
    let err = engine
        .recover(&workflow_types::ExecutionId::new("gone"))
        .await
        .unwrap_err();
    assert!(matches!(err, workflow_types::WorkflowError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn file_store_survives_purge() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::testing();
    config.storage = StorageConfig::File {
        path: dir.path().to_path_buf(),
    };
    config.retention.retention_secs = 0;

    let engine = WorkflowEngine::builder().with_config(config).build();
    let def = WorkflowDefinition::new("square", Pattern::Sequential).with_step(StepSpec::transform(
        "square",
        Transform::Expression {
            expression: "input * input".into(),
        },
    ));
    let def_id = engine.register_definition(def).await.unwrap();

    let exec = engine
        .submit(&def_id, vars(json!({"input": 7})), BTreeMap::new())
        .await
        .unwrap();
    engine.wait(&exec).await.unwrap();

    assert_eq!(engine.purge_expired().await, 1);
    assert!(engine.list_executions().is_empty());
    assert_eq!(engine.store().list_checkpoints(&exec).await.unwrap().len(), 1);

    // answered from the newest checkpoint on disk
    let status = engine.status(&exec).await.unwrap();
    assert_eq!(status.state, ExecutionState::Completed);
    assert_eq!(status.output, Some(json!(49)));
    let waited = engine.wait(&exec).await.unwrap();
    assert_eq!(waited.output, Some(json!(49)));
}
