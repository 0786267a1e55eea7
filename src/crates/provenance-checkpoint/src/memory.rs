//! In-memory checkpoint store
//!
//! Reference [`CheckpointStore`] implementation backed by
//! `Arc<RwLock<HashMap>>`. Intended for tests and single-process runs where
//! durability across process restarts is not required; production deployments
//! implement the trait over a transactional backend.

use crate::checkpoint::{Checkpoint, RunId};
use crate::error::{CheckpointError, Result};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Storage = Arc<RwLock<HashMap<RunId, Vec<Checkpoint>>>>;

/// Thread-safe in-memory checkpoint store
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    storage: Storage,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs with at least one checkpoint
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored checkpoints across all runs
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.values().map(Vec::len).sum()
    }

    /// Drop all stored checkpoints
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut storage = self.storage.write().await;
        let entries = storage.entry(checkpoint.run_id.clone()).or_default();

        if let Some(last) = entries.last() {
            if checkpoint.sequence <= last.sequence {
                return Err(CheckpointError::Storage(format!(
                    "non-monotonic sequence {} after {} for run '{}'",
                    checkpoint.sequence, last.sequence, checkpoint.run_id
                )));
            }
        }

        tracing::debug!(
            run_id = %checkpoint.run_id,
            node_id = %checkpoint.node_id,
            sequence = checkpoint.sequence,
            "Checkpoint stored"
        );
        entries.push(checkpoint);
        Ok(())
    }

    async fn latest(&self, run_id: &RunId) -> Result<Option<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(run_id).and_then(|v| v.last().cloned()))
    }

    async fn list(&self, run_id: &RunId) -> Result<Vec<Checkpoint>> {
        let storage = self.storage.read().await;
        Ok(storage.get(run_id).cloned().unwrap_or_default())
    }

    async fn delete_run(&self, run_id: &RunId) -> Result<()> {
        let mut storage = self.storage.write().await;
        storage
            .remove(run_id)
            .map(|_| ())
            .ok_or_else(|| CheckpointError::NotFound(run_id.clone()))
    }
}
