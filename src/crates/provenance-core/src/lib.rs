//! # provenance-core
//!
//! Row-oriented pipeline execution engine with an audit-grade record of
//! every decision. Rows move as tokens through an immutable DAG of sources,
//! transforms, gates, aggregations, coalesce points, and sinks; every node
//! entry, routing decision, lineage operation, and external call lands on
//! the audit trail, and crash recovery is deterministic through hash-pinned
//! checkpoints (see the `provenance-checkpoint` crate).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Orchestrator          run lifecycle, resume, abort          │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  RowProcessor        work queue, routing, state machine │  │
//! │  │  ┌──────────────┐  ┌───────────────┐  ┌──────────────┐  │  │
//! │  │  │  Executors   │  │  TokenManager │  │  Triggers    │  │  │
//! │  │  └──────┬───────┘  └───────────────┘  └──────────────┘  │  │
//! │  └─────────┼────────────────────────────────────────────── ┘  │
//! │            ▼                                                  │
//! │    Plugin protocol     Source / Transform / Gate / Sink       │
//! │                                                               │
//! │  RowReorderBuffer      ordered release over concurrent work   │
//! │  ExecutionGraph        immutable DAG, deterministic node ids  │
//! │  Clock                 injected wall/monotonic time           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use provenance_core::{
//!     GraphBuilder, NodeKind, NodeSpec, Orchestrator, PluginRegistry,
//! };
//!
//! let mut builder = GraphBuilder::new();
//! let source = builder.add_node(NodeSpec::new("reader", NodeKind::Source, "csv"));
//! let shape = builder.add_node(NodeSpec::new("shape", NodeKind::Transform, "normalize"));
//! let sink = builder.add_node(NodeSpec::new("writer", NodeKind::Sink, "parquet"));
//! builder.add_edge(&source, &shape, "out");
//! builder.add_edge(&shape, &sink, "out");
//! let graph = builder.build()?;
//!
//! let report = Orchestrator::new(graph.into(), registry, store, audit, clock)
//!     .run()
//!     .await?;
//! println!("completed {} rows", report.completed);
//! ```
//!
//! # Guarantees
//!
//! - **Ordered release**: within a stage, output order always matches input
//!   submission order, even when plugin calls complete out of order.
//! - **Lineage integrity**: fork/expand record a cardinality contract; a
//!   partial join is a fatal integrity error, never a silent partial merge.
//! - **Hash-exact resume**: a checkpoint resumes only against the exact
//!   topology and node configuration it was written under.
//! - **No silent drops**: unresolved routing labels, double ticket
//!   completions, and audit-sink refusals all abort the run.

pub mod audit;
pub mod checkpointing;
pub mod clock;
pub mod error;
pub mod executors;
pub mod graph;
pub mod orchestrator;
pub mod plugin;
pub mod processor;
pub mod reorder;
pub mod retry;
pub mod throttle;
pub mod token;
pub mod trigger;

pub use audit::{AuditEvent, AuditRecord, AuditSink, Auditor, FailingAuditSink, MemoryAuditSink};
pub use checkpointing::CheckpointManager;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{PipelineError, Result};
pub use executors::{
    AggregationExecutor, CoalesceExecutor, ExecutorAction, GateExecutor, SinkExecutor,
    TransformExecutor,
};
pub use graph::{
    Edge, ExecutionGraph, GraphBuilder, Node, NodeId, NodeKind, NodeSpec, RoutingMode,
    DEFAULT_EDGE,
};
pub use orchestrator::{Orchestrator, RunReport};
pub use plugin::{
    GatePlugin, PluginContext, PluginRegistry, ProcessOutcome, SinkPlugin, SourcePlugin,
    SourceRecord, TransformPlugin,
};
pub use processor::{RowOutcome, RowProcessor, TerminalState, WorkItem};
pub use reorder::{ReorderTicket, RowReorderBuffer};
pub use retry::{RetryPolicy, RetryState};
pub use throttle::AimdThrottle;
pub use token::{RowId, Token, TokenId, TokenManager};
pub use trigger::{AggregationBatch, FiredTrigger, TriggerConfig, TriggerEvaluator};
