//! Checkpoint persistence
//!
//! The scheduler writes a [`Checkpoint`] after every durable transition and
//! recovery reads the latest one back. Two stores ship: an in-memory store
//! for development and tests, and a JSON file store.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use async_trait::async_trait;
use thiserror::Error;
use workflow_types::{Checkpoint, ExecutionId};

/// Errors raised by checkpoint stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Backend(String),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence collaborator for execution checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()>;

    /// Latest checkpoint by sequence number, if any
    async fn load_latest_checkpoint(&self, execution: &ExecutionId) -> StoreResult<Option<Checkpoint>>;

    /// Sequence numbers stored for an execution, ascending
    async fn list_checkpoints(&self, execution: &ExecutionId) -> StoreResult<Vec<u64>>;

    /// Keep only the newest `keep` checkpoints; returns how many were removed
    async fn prune(&self, execution: &ExecutionId, keep: usize) -> StoreResult<usize>;

    /// Remove every checkpoint of an execution
    async fn delete(&self, execution: &ExecutionId) -> StoreResult<()>;

    /// Executions with at least one checkpoint
    async fn list_executions(&self) -> StoreResult<Vec<ExecutionId>>;
}
