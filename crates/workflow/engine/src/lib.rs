//! Workflow orchestration runtime
//!
//! The engine accepts declared workflow definitions, compiles each
//! pattern into a directed graph of steps, and drives executions of that
//! graph to completion: binding roles to capable agents, running steps
//! concurrently where the graph allows, retrying and timing out attempts,
//! evaluating guards, and checkpointing so an execution survives a crash.
//!
//! # Key Principle
//!
//! **The engine coordinates, collaborators act.**
//!
//! Agent tasks, tool calls and webhooks are delegated through traits.
//! The scheduler only decides what runs next and records what happened.
//!
//! # Architecture
//!
//! The [`WorkflowEngine`] composes specialized components:
//!
//! - [`DefinitionRegistry`]: stores definitions and their compiled graphs
//! - [`PatternCompiler`]: lowers a pattern to a [`CompiledGraph`]
//! - [`CapabilityRegistry`]: agents, their capabilities, role binding
//! - [`Scheduler`]: one actor per execution, owns readiness and checkpoints
//! - [`StepDispatcher`]: runs one attempt of a step by kind
//! - [`CheckpointStore`]: durable snapshots for recovery
//! - [`HumanInputHub`]: delivers external signals to waiting steps
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use workflow_engine::WorkflowEngine;
//! use workflow_types::{Pattern, StepSpec, Transform, WorkflowDefinition};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = WorkflowEngine::builder().build();
//!
//! let def = WorkflowDefinition::new("double", Pattern::Sequential).with_step(
//!     StepSpec::transform(
//!         "double",
//!         Transform::Expression {
//!             expression: "input * 2".into(),
//!         },
//!     ),
//! );
//! let def_id = engine.register_definition(def).await.unwrap();
//!
//! let mut vars = serde_json::Map::new();
//! vars.insert("input".into(), json!(21));
//! let exec_id = engine.submit(&def_id, vars, Default::default()).await.unwrap();
//!
//! let status = engine.wait(&exec_id).await.unwrap();
//! assert_eq!(status.output, Some(json!(42)));
//! # }
//! ```

#![deny(unsafe_code)]

pub mod capability_registry;
pub mod collaborators;
pub mod compiler;
pub mod config;
pub mod definition_registry;
pub mod engine;
pub mod executor;
pub mod graph;
pub mod human;
pub mod scheduler;
pub mod store;

// Re-export main types
pub use capability_registry::CapabilityRegistry;
pub use collaborators::{
    AgentExecutor, CollaboratorError, CollaboratorResult, HttpWebhookClient, ToolInvoker,
    Unconfigured, WebhookClient,
};
pub use compiler::PatternCompiler;
pub use crate::config::{EngineConfig, LoggingConfig, RetentionConfig, SchedulerConfig, StorageConfig};
pub use definition_registry::{DefinitionRegistry, RegisteredDefinition};
pub use engine::{EngineBuilder, WorkflowEngine};
pub use executor::{StepContext, StepDispatcher};
pub use graph::CompiledGraph;
pub use human::HumanInputHub;
pub use scheduler::Scheduler;
pub use store::{
    CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, StoreError, StoreResult,
};
