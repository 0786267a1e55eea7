//! Resume compatibility checking
//!
//! A stored checkpoint is only trusted against the exact graph it was written
//! under. [`RecoveryManager::can_resume`] compares the checkpoint's embedded
//! topology and node-config hashes against the current graph's hashes and
//! returns a boolean-with-reason [`ResumeCheck`]. Compatibility is never
//! assumed by default:
//!
//! - format version older than [`Checkpoint::MIN_SUPPORTED_VERSION`] → refused
//!   (the v1 legacy line had no deterministic node ids and is permanently
//!   rejected)
//! - missing (empty) topology or config hash → refused
//! - topology hash mismatch → refused
//! - config hash mismatch for the checkpointed node → refused
//! - checkpointed node absent from the current graph → refused
//!
//! On an accepted checkpoint, [`RecoveryManager::resume_point`] reconstructs
//! the [`ResumePoint`] the orchestrator uses to re-enter execution at the
//! correct node and sequence number without re-running upstream work.

use crate::checkpoint::{AggregationSnapshot, Checkpoint, SequenceNo};
use crate::error::{CheckpointError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Content hashes of the currently loaded graph, computed at build time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphHashes {
    /// Hash over ordered node ids and the full edge table
    pub topology: String,

    /// Per-node hash of normalized configuration, keyed by node id
    pub node_configs: HashMap<String, String>,
}

/// Outcome of a resume compatibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeCheck {
    /// Whether resume is permitted
    pub resumable: bool,

    /// Why resume was refused, when it was
    pub reason: Option<String>,
}

impl ResumeCheck {
    pub fn ok() -> Self {
        Self {
            resumable: true,
            reason: None,
        }
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            resumable: false,
            reason: Some(reason.into()),
        }
    }
}

/// Reconstructed entry point for resuming a run
#[derive(Debug, Clone)]
pub struct ResumePoint {
    /// The accepted checkpoint, kept whole for audit reporting
    pub checkpoint: Checkpoint,

    /// Token that was at the safe boundary
    pub token_id: String,

    /// Node to re-enter at
    pub node_id: String,

    /// Sequence number of the safe boundary
    pub sequence: SequenceNo,

    /// Source rows fully handled at the boundary; resume skips this many
    pub row_index: u64,

    /// Buffered aggregation batches to restore, keyed by node id
    pub aggregation: HashMap<String, AggregationSnapshot>,
}

/// Validates stored checkpoints against the current graph before resuming
#[derive(Debug, Clone, Default)]
pub struct RecoveryManager;

impl RecoveryManager {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `checkpoint` may resume against a graph with `current`
    /// hashes. Returns a reason for every refusal.
    pub fn can_resume(&self, checkpoint: &Checkpoint, current: &GraphHashes) -> ResumeCheck {
        if checkpoint.v < Checkpoint::MIN_SUPPORTED_VERSION {
            return ResumeCheck::refused(format!(
                "checkpoint format version {} is older than the supported minimum {}",
                checkpoint.v,
                Checkpoint::MIN_SUPPORTED_VERSION
            ));
        }

        if !checkpoint.has_hashes() {
            return ResumeCheck::refused(
                "checkpoint is missing its topology hash or config hash and cannot be trusted",
            );
        }

        if checkpoint.topology_hash != current.topology {
            return ResumeCheck::refused(format!(
                "topology hash mismatch: checkpoint was written against {} but the current graph is {}",
                checkpoint.topology_hash, current.topology
            ));
        }

        match current.node_configs.get(&checkpoint.node_id) {
            None => ResumeCheck::refused(format!(
                "node '{}' no longer exists in the current graph",
                checkpoint.node_id
            )),
            Some(hash) if *hash != checkpoint.config_hash => ResumeCheck::refused(format!(
                "config hash mismatch for node '{}': checkpoint has {} but the current graph has {}",
                checkpoint.node_id, checkpoint.config_hash, hash
            )),
            Some(_) => ResumeCheck::ok(),
        }
    }

    /// Build a [`ResumePoint`] from an already-accepted checkpoint.
    ///
    /// Re-validates against `current`; an incompatible checkpoint is an error
    /// here, never a silently degraded resume.
    pub fn resume_point(&self, checkpoint: Checkpoint, current: &GraphHashes) -> Result<ResumePoint> {
        let check = self.can_resume(&checkpoint, current);
        if !check.resumable {
            return Err(CheckpointError::Incompatible(
                check.reason.unwrap_or_else(|| "resume refused".to_string()),
            ));
        }

        tracing::info!(
            run_id = %checkpoint.run_id,
            node_id = %checkpoint.node_id,
            sequence = checkpoint.sequence,
            row_index = checkpoint.row_index,
            "Resume point accepted"
        );

        Ok(ResumePoint {
            token_id: checkpoint.token_id.clone(),
            node_id: checkpoint.node_id.clone(),
            sequence: checkpoint.sequence,
            row_index: checkpoint.row_index,
            aggregation: checkpoint.aggregation.clone().unwrap_or_default(),
            checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes() -> GraphHashes {
        GraphHashes {
            topology: "topo-1".to_string(),
            node_configs: HashMap::from([("node-a".to_string(), "cfg-1".to_string())]),
        }
    }

    fn cp() -> Checkpoint {
        Checkpoint::new("run-1", "tok-1", "node-a", 4, "topo-1", "cfg-1").with_row_index(3)
    }

    #[test]
    fn test_matching_hashes_resume() {
        let check = RecoveryManager::new().can_resume(&cp(), &hashes());
        assert!(check.resumable);
        assert!(check.reason.is_none());
    }

    #[test]
    fn test_topology_drift_refused() {
        let mut current = hashes();
        current.topology = "topo-2".to_string();

        let check = RecoveryManager::new().can_resume(&cp(), &current);
        assert!(!check.resumable);
        assert!(check.reason.unwrap().contains("topology hash"));
    }

    #[test]
    fn test_config_drift_refused() {
        let mut current = hashes();
        current
            .node_configs
            .insert("node-a".to_string(), "cfg-2".to_string());

        let check = RecoveryManager::new().can_resume(&cp(), &current);
        assert!(!check.resumable);
        assert!(check.reason.unwrap().contains("config hash"));
    }

    #[test]
    fn test_missing_node_refused() {
        let mut current = hashes();
        current.node_configs.clear();

        let check = RecoveryManager::new().can_resume(&cp(), &current);
        assert!(!check.resumable);
        assert!(check.reason.unwrap().contains("no longer exists"));
    }

    #[test]
    fn test_legacy_version_permanently_rejected() {
        let mut checkpoint = cp();
        checkpoint.v = Checkpoint::LEGACY_VERSION;

        let check = RecoveryManager::new().can_resume(&checkpoint, &hashes());
        assert!(!check.resumable);
        assert!(check.reason.unwrap().contains("format version"));
    }

    #[test]
    fn test_absent_hashes_refused() {
        let mut checkpoint = cp();
        checkpoint.topology_hash.clear();

        let check = RecoveryManager::new().can_resume(&checkpoint, &hashes());
        assert!(!check.resumable);
        assert!(check.reason.unwrap().contains("cannot be trusted"));
    }

    #[test]
    fn test_resume_point_carries_aggregation() {
        let snapshot = AggregationSnapshot {
            node_id: "node-a".to_string(),
            rows: vec![serde_json::json!({"n": 1})],
            member_tokens: vec!["tok-9".to_string()],
            first_accept_ms: None,
        };
        let checkpoint =
            cp().with_aggregation(HashMap::from([("node-a".to_string(), snapshot)]));

        let point = RecoveryManager::new()
            .resume_point(checkpoint, &hashes())
            .unwrap();
        assert_eq!(point.node_id, "node-a");
        assert_eq!(point.sequence, 4);
        assert_eq!(point.row_index, 3);
        assert_eq!(point.aggregation["node-a"].rows.len(), 1);
    }

    #[test]
    fn test_resume_point_rejects_incompatible() {
        let mut current = hashes();
        current.topology = "topo-2".to_string();

        let err = RecoveryManager::new()
            .resume_point(cp(), &current)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Incompatible(_)));
    }
}
