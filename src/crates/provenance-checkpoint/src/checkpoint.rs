//! Core checkpoint data structures for crash recovery
//!
//! This module defines the persisted checkpoint record the engine writes after
//! every safe boundary (a token reaching a terminal outcome, an aggregation
//! batch flushing). A checkpoint captures *which* token was at *which* node at
//! a monotonically increasing sequence number, pinned to a specific graph via
//! two content hashes.
//!
//! # Record Structure
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │  Checkpoint                                           │
//! │  • v: 2                  format version               │
//! │  • run_id                which run                    │
//! │  • token_id / node_id    where execution stood        │
//! │  • sequence              monotonic safe-boundary no.  │
//! │  • row_index             source rows fully handled    │
//! │  • ts                    wall-clock timestamp         │
//! │  • topology_hash         hash of the whole DAG        │
//! │  • config_hash           hash of the node's config    │
//! │  • aggregation           optional buffered batch      │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! The topology and config hashes are mandatory. A checkpoint without them
//! cannot be trusted: resume compatibility is decided by exact hash equality,
//! never assumed. Format version 1 (the legacy line without deterministic
//! node ids) is permanently rejected on resume; version 2 is the only
//! supported line.
//!
//! # See Also
//!
//! - [`CheckpointStore`](crate::traits::CheckpointStore) - Storage backends
//! - [`RecoveryManager`](crate::recovery::RecoveryManager) - Resume checking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Run identifier type
pub type RunId = String;

/// Monotonic safe-boundary sequence number within a run
pub type SequenceNo = u64;

/// Snapshot of a buffered aggregation batch, embedded in a checkpoint so a
/// resumed run does not lose rows that were accepted but never flushed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregationSnapshot {
    /// Aggregation node that owns the batch
    pub node_id: String,

    /// Buffered row payloads, in acceptance order
    pub rows: Vec<serde_json::Value>,

    /// Token ids consumed into the batch, parallel to `rows`
    pub member_tokens: Vec<String>,

    /// Monotonic clock reading (ms) at first accept, if any row was accepted
    pub first_accept_ms: Option<u64>,
}

/// Persisted resumption point tied to a specific graph topology and node
/// configuration via content hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version
    pub v: u32,

    /// Run this checkpoint belongs to
    pub run_id: RunId,

    /// Token that reached the safe boundary
    pub token_id: String,

    /// Node the token stood at
    pub node_id: String,

    /// Monotonically increasing sequence number within the run
    pub sequence: SequenceNo,

    /// Count of source rows fully handled when this checkpoint was written.
    ///
    /// Distinct from `sequence`: timeout sweeps and end-of-run flushes also
    /// consume sequence numbers without draining a source row, so resume
    /// skips by this cursor rather than by `sequence`.
    pub row_index: u64,

    /// Wall-clock timestamp at persist time
    pub ts: DateTime<Utc>,

    /// Hash of the upstream topology (ordered node ids + edges).
    ///
    /// Mandatory: an empty value makes the checkpoint unresumable.
    pub topology_hash: String,

    /// Hash of the normalized configuration of `node_id`.
    ///
    /// Mandatory: an empty value makes the checkpoint unresumable.
    pub config_hash: String,

    /// Buffered aggregation batches at persist time, keyed by node id.
    ///
    /// No `skip_serializing_if` here: the record must roundtrip through both
    /// the JSON and bincode serializers.
    pub aggregation: Option<HashMap<String, AggregationSnapshot>>,
}

impl Checkpoint {
    /// Current checkpoint format version
    pub const CURRENT_VERSION: u32 = 2;

    /// Oldest format version a resume will accept
    pub const MIN_SUPPORTED_VERSION: u32 = 2;

    /// Legacy format marker: no deterministic node ids, permanently rejected
    pub const LEGACY_VERSION: u32 = 1;

    /// Create a checkpoint at the current format version
    pub fn new(
        run_id: impl Into<String>,
        token_id: impl Into<String>,
        node_id: impl Into<String>,
        sequence: SequenceNo,
        topology_hash: impl Into<String>,
        config_hash: impl Into<String>,
    ) -> Self {
        Self {
            v: Self::CURRENT_VERSION,
            run_id: run_id.into(),
            token_id: token_id.into(),
            node_id: node_id.into(),
            sequence,
            row_index: 0,
            ts: Utc::now(),
            topology_hash: topology_hash.into(),
            config_hash: config_hash.into(),
            aggregation: None,
        }
    }

    /// Attach buffered aggregation state
    pub fn with_aggregation(mut self, aggregation: HashMap<String, AggregationSnapshot>) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Record the number of source rows fully handled at this boundary
    pub fn with_row_index(mut self, row_index: u64) -> Self {
        self.row_index = row_index;
        self
    }

    /// Whether both mandatory hashes are present (non-empty)
    pub fn has_hashes(&self) -> bool {
        !self.topology_hash.is_empty() && !self.config_hash.is_empty()
    }
}
