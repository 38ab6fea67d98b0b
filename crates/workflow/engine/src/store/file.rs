//! File-system checkpoint store
//!
//! Layout: `<root>/<execution_id>/<sequence>.json`, with the sequence
//! zero-padded so lexical and numeric order agree. Writes go to a
//! temporary file first and are renamed into place.

use super::{CheckpointStore, StoreResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use workflow_types::{Checkpoint, ExecutionId};

/// JSON-file checkpoint store
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `root`; the directory is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn execution_dir(&self, execution: &ExecutionId) -> PathBuf {
        self.root.join(&execution.0)
    }

    fn checkpoint_path(&self, execution: &ExecutionId, sequence: u64) -> PathBuf {
        self.execution_dir(execution)
            .join(format!("{:020}.json", sequence))
    }

    /// Sequence numbers present on disk, ascending
    async fn sequences(&self, execution: &ExecutionId) -> StoreResult<Vec<u64>> {
        let mut entries = match fs::read_dir(self.execution_dir(execution)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(sequence) = stem.parse::<u64>() {
                out.push(sequence);
            }
        }
        out.sort_unstable();
        Ok(out)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> StoreResult<()> {
        let dir = self.execution_dir(&checkpoint.execution_id);
        fs::create_dir_all(&dir).await?;

        let path = self.checkpoint_path(&checkpoint.execution_id, checkpoint.sequence);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;

        tracing::trace!(
            execution_id = %checkpoint.execution_id,
            sequence = checkpoint.sequence,
            "Checkpoint written"
        );
        Ok(())
    }

    async fn load_latest_checkpoint(&self, execution: &ExecutionId) -> StoreResult<Option<Checkpoint>> {
        let Some(latest) = self.sequences(execution).await?.pop() else {
            return Ok(None);
        };
        let body = fs::read(self.checkpoint_path(execution, latest)).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn list_checkpoints(&self, execution: &ExecutionId) -> StoreResult<Vec<u64>> {
        self.sequences(execution).await
    }

    async fn prune(&self, execution: &ExecutionId, keep: usize) -> StoreResult<usize> {
        let sequences = self.sequences(execution).await?;
        let excess = sequences.len().saturating_sub(keep);
        for sequence in &sequences[..excess] {
            match fs::remove_file(self.checkpoint_path(execution, *sequence)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(excess)
    }

    async fn delete(&self, execution: &ExecutionId) -> StoreResult<()> {
        match fs::remove_dir_all(self.execution_dir(execution)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_executions(&self) -> StoreResult<Vec<ExecutionId>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(ExecutionId::new(name));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
