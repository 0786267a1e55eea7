//! CheckpointManager: persists safe boundaries with monotonic sequencing
//!
//! The orchestrator calls [`CheckpointManager::record`] after each safe
//! boundary (a token reaching a terminal state, an aggregation batch flush).
//! Every record embeds the current graph's topology and config hashes, which
//! is what lets [`RecoveryManager`](provenance_checkpoint::RecoveryManager)
//! refuse resume after any drift.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use provenance_checkpoint::{
    AggregationSnapshot, Checkpoint, CheckpointStore, GraphHashes, SequenceNo,
};

use crate::audit::{AuditEvent, Auditor};
use crate::error::{PipelineError, Result};
use crate::graph::NodeId;

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    run_id: String,
    hashes: GraphHashes,
    sequence: AtomicU64,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, run_id: impl Into<String>, hashes: GraphHashes) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            hashes,
            sequence: AtomicU64::new(0),
        }
    }

    /// Resume continues the sequence where the accepted checkpoint left off
    pub fn resume_from(self, sequence: SequenceNo) -> Self {
        self.sequence.store(sequence + 1, Ordering::SeqCst);
        self
    }

    /// Persist one safe boundary and record it on the audit trail.
    ///
    /// `aggregation` carries the buffered batches still open at this
    /// boundary, so a crash never loses accepted-but-unflushed rows.
    /// `row_index` is the count of source rows fully handled so far; sweeps
    /// and end-of-run flushes advance the sequence without advancing it.
    pub async fn record(
        &self,
        token_id: &str,
        node_id: &NodeId,
        row_index: u64,
        aggregation: Option<HashMap<String, AggregationSnapshot>>,
        auditor: &Auditor,
    ) -> Result<SequenceNo> {
        let config_hash = self.hashes.node_configs.get(node_id).ok_or_else(|| {
            PipelineError::integrity(format!(
                "checkpoint requested for node '{node_id}' absent from the graph hashes"
            ))
        })?;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut checkpoint = Checkpoint::new(
            self.run_id.clone(),
            token_id,
            node_id.clone(),
            sequence,
            self.hashes.topology.clone(),
            config_hash.clone(),
        )
        .with_row_index(row_index);
        if let Some(aggregation) = aggregation {
            checkpoint = checkpoint.with_aggregation(aggregation);
        }

        self.store.put(checkpoint).await?;
        debug!(
            run = %self.run_id,
            token = %token_id,
            node = %node_id,
            sequence,
            "checkpoint persisted"
        );
        auditor
            .emit(AuditEvent::CheckpointPersisted {
                run_id: self.run_id.clone(),
                token_id: token_id.to_string(),
                node_id: node_id.clone(),
                sequence,
            })
            .await?;
        Ok(sequence)
    }

    /// Sequence number the next record will take
    pub fn next_sequence(&self) -> SequenceNo {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn hashes(&self) -> &GraphHashes {
        &self.hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::SystemClock;
    use provenance_checkpoint::MemoryCheckpointStore;

    fn hashes() -> GraphHashes {
        GraphHashes {
            topology: "topo".to_string(),
            node_configs: HashMap::from([("node-a".to_string(), "cfg-a".to_string())]),
        }
    }

    fn auditor() -> Auditor {
        Auditor::new(Arc::new(MemoryAuditSink::new()), Arc::new(SystemClock::new()))
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = CheckpointManager::new(store.clone(), "run-1", hashes());
        let auditor = auditor();

        for expected in 0..3u64 {
            let seq = manager
                .record("tok-1", &"node-a".to_string(), expected + 1, None, &auditor)
                .await
                .unwrap();
            assert_eq!(seq, expected);
        }

        let latest = store.latest(&"run-1".to_string()).await.unwrap().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.topology_hash, "topo");
        assert_eq!(latest.config_hash, "cfg-a");
        assert_eq!(latest.row_index, 3);
    }

    #[tokio::test]
    async fn test_unknown_node_refused() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = CheckpointManager::new(store, "run-1", hashes());

        let err = manager
            .record("tok-1", &"ghost".to_string(), 0, None, &auditor())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_resume_continues_sequence() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = CheckpointManager::new(store, "run-1", hashes()).resume_from(41);
        assert_eq!(manager.next_sequence(), 42);
    }
}
