//! Audit trail events and the sink they are recorded through
//!
//! Every decision the engine makes about a row is emitted as a structured
//! [`AuditEvent`]: node entry and exit, routing, token lineage operations,
//! batch accepts and flushes, external calls, checkpoint persists, and
//! terminal outcomes. The trail is what makes "what happened to this record
//! and why" reconstructible after the fact, so recording is not best-effort:
//! a sink failure surfaces as [`PipelineError::Audit`] and aborts the run
//! rather than leaving a silent gap in the record.
//!
//! Storage is behind the [`AuditSink`] trait; the engine ships only the
//! in-memory backend used by tests. A durable store is expected to offer
//! transactional writes and to reject referentially-broken records itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{PipelineError, Result};

/// One structured entry in the audit trail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    RunStarted {
        run_id: String,
    },
    RunFinished {
        run_id: String,
        completed: u64,
        failed: u64,
        quarantined: u64,
        aborted: bool,
    },
    NodeEntered {
        run_id: String,
        token_id: String,
        row_id: String,
        node_id: String,
    },
    NodeExited {
        run_id: String,
        token_id: String,
        node_id: String,
        outcome: String,
    },
    Routed {
        run_id: String,
        token_id: String,
        from_node: String,
        to_node: String,
        label: String,
    },
    TokenForked {
        run_id: String,
        parent_token_id: String,
        fork_group: String,
        branches: Vec<String>,
        child_token_ids: Vec<String>,
    },
    TokenExpanded {
        run_id: String,
        parent_token_id: String,
        expand_group: String,
        child_token_ids: Vec<String>,
    },
    TokensJoined {
        run_id: String,
        group: String,
        member_token_ids: Vec<String>,
        join_group: String,
        merged_token_id: String,
    },
    BatchAccepted {
        run_id: String,
        node_id: String,
        token_id: String,
        batch_size: usize,
    },
    BatchFlushed {
        run_id: String,
        node_id: String,
        trigger: String,
        member_token_ids: Vec<String>,
        batch_token_id: String,
    },
    ExternalCall {
        run_id: String,
        node_id: String,
        service: String,
        succeeded: bool,
    },
    RetryScheduled {
        run_id: String,
        token_id: String,
        node_id: String,
        attempt: usize,
        reason: String,
    },
    TokenSuspended {
        run_id: String,
        token_id: String,
        node_id: String,
    },
    CheckpointPersisted {
        run_id: String,
        token_id: String,
        node_id: String,
        sequence: u64,
    },
    TerminalOutcome {
        run_id: String,
        token_id: String,
        row_id: String,
        outcome: String,
        node_id: String,
        reason: Option<String>,
    },
    RowQuarantined {
        run_id: String,
        row_id: String,
        reason: String,
    },
}

/// An event together with the wall-clock instant it was recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Destination for the audit trail. Implementations must be atomic per
/// record; a returned error is fatal to the run.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// Stamps events with the injected clock and forwards them to the sink
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }

    /// Record one event; a sink refusal propagates as a fatal error
    pub async fn emit(&self, event: AuditEvent) -> Result<()> {
        self.sink
            .record(AuditRecord {
                ts: self.clock.now(),
                event,
            })
            .await
    }
}

/// In-memory audit sink for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far, in order
    pub fn events(&self) -> Vec<AuditEvent> {
        self.records.read().iter().map(|r| r.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Events matching a predicate, for scenario assertions
    pub fn events_where<F>(&self, predicate: F) -> Vec<AuditEvent>
    where
        F: Fn(&AuditEvent) -> bool,
    {
        self.records
            .read()
            .iter()
            .map(|r| &r.event)
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }
}

/// A sink that refuses every write, for exercising the fatal-on-gap rule
#[derive(Debug, Default)]
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        Err(PipelineError::Audit(format!(
            "audit store rejected record at {}",
            record.ts
        )))
    }
}
