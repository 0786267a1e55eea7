//! # provenance-checkpoint - Crash Recovery for the Pipeline Engine
//!
//! **Checkpoint data model, storage trait abstractions and resume checking**
//! for the provenance execution engine. A checkpoint is the persisted record
//! of a safe boundary: which token stood at which node, at which sequence
//! number, under which exact graph.
//!
//! ## Overview
//!
//! The checkpoint system provides:
//!
//! - **Safe-boundary records** - (run id, token id, node id, sequence number)
//!   plus buffered aggregation state
//! - **Hash pinning** - every checkpoint embeds the graph's topology hash and
//!   the node's config hash; resume is refused on any mismatch
//! - **Versioned format** - format v2 is the only supported line; the v1
//!   legacy format (no deterministic node ids) is permanently rejected
//! - **Pluggable storage** - the engine depends on the [`CheckpointStore`]
//!   trait; [`MemoryCheckpointStore`] is the reference backend
//! - **Explicit refusal reasons** - [`RecoveryManager::can_resume`] returns a
//!   boolean-with-reason [`ResumeCheck`], never a bare boolean
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use provenance_checkpoint::{
//!     Checkpoint, CheckpointStore, GraphHashes, MemoryCheckpointStore, RecoveryManager,
//! };
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryCheckpointStore::new();
//!
//!     let checkpoint = Checkpoint::new("run-1", "tok-1", "node-a", 1, "topo", "cfg");
//!     store.put(checkpoint).await?;
//!
//!     let current = GraphHashes {
//!         topology: "topo".to_string(),
//!         node_configs: HashMap::from([("node-a".to_string(), "cfg".to_string())]),
//!     };
//!
//!     if let Some(latest) = store.latest(&"run-1".to_string()).await? {
//!         let check = RecoveryManager::new().can_resume(&latest, &current);
//!         assert!(check.resumable);
//!     }
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod recovery;
pub mod serializer;
pub mod traits;

pub use checkpoint::{AggregationSnapshot, Checkpoint, RunId, SequenceNo};
pub use error::{CheckpointError, Result};
pub use memory::MemoryCheckpointStore;
pub use recovery::{GraphHashes, RecoveryManager, ResumeCheck, ResumePoint};
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
