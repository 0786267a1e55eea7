//! Storage trait abstraction for checkpoint backends
//!
//! The engine depends only on [`CheckpointStore`]; backends are pluggable.
//! The crate ships [`MemoryCheckpointStore`](crate::memory::MemoryCheckpointStore)
//! as the reference implementation. Production deployments implement this
//! trait over a transactional store (PostgreSQL, SQLite, object storage).
//!
//! Backends must be append-only from the engine's perspective: a `put` never
//! overwrites an earlier sequence number, and `latest` always returns the
//! highest persisted sequence for a run.

use crate::checkpoint::{Checkpoint, RunId};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence backend for checkpoint records
///
/// # Implementing a Backend
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use provenance_checkpoint::{Checkpoint, CheckpointStore, Result};
///
/// struct PostgresCheckpointStore { /* pool */ }
///
/// #[async_trait]
/// impl CheckpointStore for PostgresCheckpointStore {
///     async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
///         // INSERT keyed by (run_id, token_id, node_id, sequence)
///         todo!()
///     }
///
///     async fn latest(&self, run_id: &str) -> Result<Option<Checkpoint>> {
///         // SELECT ... ORDER BY sequence DESC LIMIT 1
///         todo!()
///     }
///
///     async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
///         todo!()
///     }
///
///     async fn delete_run(&self, run_id: &str) -> Result<()> {
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint record
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Most recent checkpoint (highest sequence number) for a run
    async fn latest(&self, run_id: &RunId) -> Result<Option<Checkpoint>>;

    /// All checkpoints for a run, ascending by sequence number
    async fn list(&self, run_id: &RunId) -> Result<Vec<Checkpoint>>;

    /// Remove all checkpoints for a run
    async fn delete_run(&self, run_id: &RunId) -> Result<()>;
}
