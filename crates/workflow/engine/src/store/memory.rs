//! In-memory checkpoint store for development and testing.
//!
//! Not durable across process restarts.

use super::{CheckpointStore, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use workflow_types::{Checkpoint, ExecutionId};

/// In-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    /// Checkpoints per execution, ordered by sequence
    checkpoints: Arc<DashMap<ExecutionId, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total checkpoints across all executions
    pub fn total_count(&self) -> usize {
        self.checkpoints.iter().map(|e| e.value().len()).sum()
    }

    pub fn clear(&self) {
        self.checkpoints.clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        let mut entry = self
            .checkpoints
            .entry(checkpoint.execution_id.clone())
            .or_default();
        match entry.binary_search_by_key(&checkpoint.sequence, |c| c.sequence) {
            Ok(pos) => entry[pos] = checkpoint.clone(),
            Err(pos) => entry.insert(pos, checkpoint.clone()),
        }
        Ok(())
    }

    async fn load_latest_checkpoint(&self, execution: &ExecutionId) -> StoreResult<Option<Checkpoint>> {
        Ok(self
            .checkpoints
            .get(execution)
            .and_then(|list| list.last().cloned()))
    }

    async fn list_checkpoints(&self, execution: &ExecutionId) -> StoreResult<Vec<u64>> {
        Ok(self
            .checkpoints
            .get(execution)
            .map(|list| list.iter().map(|c| c.sequence).collect())
            .unwrap_or_default())
    }

    async fn prune(&self, execution: &ExecutionId, keep: usize) -> StoreResult<usize> {
        let Some(mut list) = self.checkpoints.get_mut(execution) else {
            return Ok(0);
        };
        let excess = list.len().saturating_sub(keep);
        list.drain(..excess);
        Ok(excess)
    }

    async fn delete(&self, execution: &ExecutionId) -> StoreResult<()> {
        self.checkpoints.remove(execution);
        Ok(())
    }

    async fn list_executions(&self) -> StoreResult<Vec<ExecutionId>> {
        let mut ids: Vec<ExecutionId> = self.checkpoints.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::{ExecutionSnapshot, StepId, WorkflowDefinitionId};

    fn checkpoint(exec: &str, sequence: u64) -> Checkpoint {
        let steps = [StepId::new("a")];
        let mut snapshot = ExecutionSnapshot::new(
            ExecutionId::new(exec),
            WorkflowDefinitionId::new("def"),
            steps.iter(),
            0,
            Default::default(),
            Default::default(),
        );
        snapshot.sequence = sequence;
        Checkpoint::capture(&snapshot)
    }

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let store = InMemoryCheckpointStore::new();
        store.save_checkpoint(&checkpoint("e1", 2)).await.unwrap();
        store.save_checkpoint(&checkpoint("e1", 1)).await.unwrap();
        store.save_checkpoint(&checkpoint("e2", 5)).await.unwrap();

        let latest = store
            .load_latest_checkpoint(&ExecutionId::new("e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(
            store.list_checkpoints(&ExecutionId::new("e1")).await.unwrap(),
            vec![1, 2]
        );
        assert_eq!(store.total_count(), 3);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = InMemoryCheckpointStore::new();
        assert!(store
            .load_latest_checkpoint(&ExecutionId::new("nope"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let store = InMemoryCheckpointStore::new();
        for seq in 1..=5 {
            store.save_checkpoint(&checkpoint("e1", seq)).await.unwrap();
        }
        let exec = ExecutionId::new("e1");
        assert_eq!(store.prune(&exec, 2).await.unwrap(), 3);
        assert_eq!(store.list_checkpoints(&exec).await.unwrap(), vec![4, 5]);
        assert_eq!(store.prune(&exec, 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = InMemoryCheckpointStore::new();
        store.save_checkpoint(&checkpoint("b", 1)).await.unwrap();
        store.save_checkpoint(&checkpoint("a", 1)).await.unwrap();
        assert_eq!(
            store.list_executions().await.unwrap(),
            vec![ExecutionId::new("a"), ExecutionId::new("b")]
        );
        store.delete(&ExecutionId::new("a")).await.unwrap();
        assert_eq!(store.list_executions().await.unwrap().len(), 1);
    }
}
