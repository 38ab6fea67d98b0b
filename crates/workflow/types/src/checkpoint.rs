//! Checkpoints: immutable, timestamped execution snapshots

use crate::{ExecutionId, ExecutionSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a checkpoint
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub String);

impl CheckpointId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable copy of an execution's context and status table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub execution_id: ExecutionId,
    /// Copied from the snapshot; strictly increasing per execution
    pub sequence: u64,
    pub taken_at: DateTime<Utc>,
    pub snapshot: ExecutionSnapshot,
}

impl Checkpoint {
    pub fn capture(snapshot: &ExecutionSnapshot) -> Self {
        Self {
            id: CheckpointId::generate(),
            execution_id: snapshot.execution_id.clone(),
            sequence: snapshot.sequence,
            taken_at: Utc::now(),
            snapshot: snapshot.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StepId, WorkflowDefinitionId};
    use std::collections::BTreeMap;

    #[test]
    fn test_capture_copies_sequence() {
        let mut snap = ExecutionSnapshot::new(
            ExecutionId::new("e"),
            WorkflowDefinitionId::new("d"),
            [StepId::new("a")].iter(),
            0,
            serde_json::Map::new(),
            BTreeMap::new(),
        );
        snap.sequence = 7;

        let cp = Checkpoint::capture(&snap);
        assert_eq!(cp.sequence, 7);
        assert_eq!(cp.execution_id, ExecutionId::new("e"));
        assert_eq!(cp.snapshot, snap);
    }
}
