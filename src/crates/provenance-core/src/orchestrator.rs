//! Orchestrator: owns the run lifecycle
//!
//! begin → stream rows from the source → dispatch each row onto its own task
//! driving the shared [`RowProcessor`] → sweep aggregation timeouts on a
//! periodic interval → flush every remaining batch at end-of-run → flush and
//! close sinks. The orchestrator wires the graph, plugin registry, audit
//! sink, clock, and checkpoint store together; nothing below it touches more
//! than one of those seams.
//!
//! Up to `max_pending` rows run concurrently. Completions flow back through
//! a [`RowReorderBuffer`] so checkpointing sees fully processed rows in
//! strict source order even when tasks finish out of order, and so a
//! run-level abort has one choke point: shutting the buffer down refuses new
//! submissions while already-completed work still drains. Each checkpoint
//! carries both the next safe-boundary sequence number and a `row_index`
//! cursor counting source rows fully handled; sweeps and end-of-run flushes
//! advance the sequence without advancing the cursor, and resume skips by
//! the cursor, restoring buffered batches from the snapshot.

use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use provenance_checkpoint::{
    AggregationSnapshot, CheckpointStore, RecoveryManager, ResumeCheck, SequenceNo,
};

use crate::audit::{AuditEvent, AuditSink, Auditor};
use crate::clock::Clock;
use crate::error::{PipelineError, Result};
use crate::graph::{ExecutionGraph, NodeId};
use crate::plugin::{PluginContext, PluginRegistry, SourceRecord};
use crate::processor::{RowOutcome, RowProcessor, TerminalState};
use crate::reorder::RowReorderBuffer;
use crate::retry::RetryPolicy;
use crate::trigger::TriggerConfig;

/// What a finished (or aborted) run looked like
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub completed: u64,
    pub failed: u64,
    pub quarantined: u64,
    pub consumed_in_batch: u64,
    pub aborted: bool,
    pub abort_reason: Option<String>,
    /// Coordinates of the last safe checkpoint, for resume reporting
    pub last_checkpoint: Option<(NodeId, SequenceNo)>,
    /// Sequence this run resumed from, if it was a resume
    pub resumed_from: Option<SequenceNo>,
}

pub struct Orchestrator {
    graph: Arc<ExecutionGraph>,
    registry: Arc<PluginRegistry>,
    store: Arc<dyn CheckpointStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    triggers: HashMap<NodeId, TriggerConfig>,
    max_pending: usize,
    max_iterations: u64,
    /// How often aggregation timeouts are swept while the source is quiet
    sweep_interval: Duration,
    /// Row-scoped failures beyond this count abort the run
    failure_threshold: Option<u64>,
}

impl Orchestrator {
    pub fn new(
        graph: Arc<ExecutionGraph>,
        registry: Arc<PluginRegistry>,
        store: Arc<dyn CheckpointStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            graph,
            registry,
            store,
            audit,
            clock,
            retry_policy: RetryPolicy::default(),
            triggers: HashMap::new(),
            max_pending: 64,
            max_iterations: 1_000,
            sweep_interval: Duration::from_millis(100),
            failure_threshold: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Programmatic trigger configuration for an aggregation node, taking
    /// precedence over the node's declared config
    pub fn with_trigger(mut self, node_id: NodeId, config: TriggerConfig) -> Self {
        self.triggers.insert(node_id, config);
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    pub fn with_max_iterations(mut self, ceiling: u64) -> Self {
        self.max_iterations = ceiling;
        self
    }

    /// How often to check aggregation timeouts, independent of row arrival.
    /// A stalled source never starves a timed-out batch.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Execute a fresh run end to end
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = format!("run-{}", Uuid::new_v4());
        self.execute(run_id, 0, None, None).await
    }

    /// Whether the most recent checkpoint of `run_id` permits resume
    pub async fn check_resume(&self, run_id: &str) -> Result<ResumeCheck> {
        let checkpoint = self
            .store
            .latest(&run_id.to_string())
            .await?
            .ok_or_else(|| {
                PipelineError::Configuration(format!("no checkpoint stored for run '{run_id}'"))
            })?;
        Ok(RecoveryManager::new().can_resume(&checkpoint, &self.graph.hashes()))
    }

    /// Resume a crashed run from its most recent checkpoint.
    ///
    /// Refused with an explicit reason when the stored topology or config
    /// hash no longer matches the current graph, or when the checkpoint
    /// format predates the supported minimum.
    pub async fn resume(&self, run_id: &str) -> Result<RunReport> {
        let checkpoint = self
            .store
            .latest(&run_id.to_string())
            .await?
            .ok_or_else(|| {
                PipelineError::Configuration(format!("no checkpoint stored for run '{run_id}'"))
            })?;
        let point = RecoveryManager::new().resume_point(checkpoint, &self.graph.hashes())?;

        info!(
            run = %run_id,
            node = %point.node_id,
            sequence = point.sequence,
            row_index = point.row_index,
            "resuming from checkpoint"
        );
        self.execute(
            run_id.to_string(),
            point.row_index,
            Some(point.aggregation),
            Some(point.sequence),
        )
        .await
    }

    async fn execute(
        &self,
        run_id: String,
        skip_rows: u64,
        restore: Option<HashMap<String, AggregationSnapshot>>,
        resumed_from: Option<SequenceNo>,
    ) -> Result<RunReport> {
        let auditor = Auditor::new(self.audit.clone(), self.clock.clone());
        auditor
            .emit(AuditEvent::RunStarted {
                run_id: run_id.clone(),
            })
            .await?;

        let processor = Arc::new(
            RowProcessor::new(
                self.graph.clone(),
                &self.registry,
                run_id.clone(),
                self.clock.clone(),
                auditor.clone(),
                self.retry_policy.clone(),
                self.triggers.clone(),
            )?
            .with_max_iterations(self.max_iterations),
        );

        if let Some(snapshots) = restore {
            for (node_id, snapshot) in snapshots {
                processor
                    .restore_aggregation(&node_id, snapshot.rows, snapshot.first_accept_ms)
                    .await?;
            }
        }

        let checkpoints = {
            let manager = crate::checkpointing::CheckpointManager::new(
                self.store.clone(),
                run_id.clone(),
                self.graph.hashes(),
            );
            match resumed_from {
                Some(sequence) => manager.resume_from(sequence),
                None => manager,
            }
        };

        let source_node = self.graph.source()?.clone();
        let source = self.registry.source(&source_node.spec.plugin)?;
        let source_ctx = PluginContext::new(
            run_id.clone(),
            source_node.id.clone(),
            source_node.spec.config.clone(),
            self.clock.clone(),
        );
        let mut stream = source.load(&source_ctx).await?;

        let buffer: RowReorderBuffer<Vec<RowOutcome>> = RowReorderBuffer::new(self.max_pending);
        let mut report = RunReport {
            run_id: run_id.clone(),
            completed: 0,
            failed: 0,
            quarantined: 0,
            consumed_in_batch: 0,
            aborted: false,
            abort_reason: None,
            last_checkpoint: None,
            resumed_from,
        };

        let mut tasks: JoinSet<(crate::reorder::ReorderTicket, Result<Vec<RowOutcome>>)> =
            JoinSet::new();
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Source rows fully handled so far; the resume cursor. Sequence
        // numbers keep advancing during sweeps but this does not.
        let mut rows_done: u64 = skip_rows;
        let mut row_index: u64 = 0;
        let mut rows_skipped: u64 = 0;
        let mut source_done = false;

        'run: loop {
            if source_done && tasks.is_empty() {
                break;
            }

            tokio::select! {
                record = stream.next(), if !source_done
                    && (buffer.in_flight() as usize) < self.max_pending =>
                {
                    let Some(record) = record else {
                        source_done = true;
                        continue;
                    };
                    let index = row_index;
                    row_index += 1;

                    // Resume path: records up to the checkpointed boundary
                    // were already handled. Only processed rows count against
                    // the skip, since quarantines never reach a checkpoint.
                    if rows_skipped < skip_rows {
                        if matches!(record, SourceRecord::Row(_)) {
                            rows_skipped += 1;
                        }
                        continue;
                    }

                    let (row_id, data) = match record {
                        SourceRecord::Row(data) => (row_identity(&data, index), data),
                        SourceRecord::Quarantine { raw, reason } => {
                            let row_id = row_identity(&raw, index);
                            warn!(run = %run_id, row = %row_id, reason = %reason, "row quarantined");
                            auditor
                                .emit(AuditEvent::RowQuarantined {
                                    run_id: run_id.clone(),
                                    row_id,
                                    reason,
                                })
                                .await?;
                            report.quarantined += 1;
                            continue;
                        }
                    };

                    // The in_flight guard above means a permit is free, so
                    // this never parks while completions go unhandled
                    let ticket = match buffer.submit().await {
                        Ok(ticket) => ticket,
                        Err(PipelineError::Shutdown(_)) => break 'run,
                        Err(e) => return Err(e),
                    };
                    let processor = processor.clone();
                    tasks.spawn(async move {
                        let result = processor.process_row(row_id, data).await;
                        (ticket, result)
                    });
                }

                Some(joined) = tasks.join_next() => {
                    let (ticket, result) = joined.map_err(|e| {
                        PipelineError::integrity(format!("row task failed: {e}"))
                    })?;
                    let outcomes = match result {
                        Ok(outcomes) => outcomes,
                        Err(e) => {
                            // Fatal errors abort the run; the buffer refuses
                            // further submits while recorded completions stay
                            // drainable.
                            buffer.shutdown();
                            self.finish_report(&auditor, &mut report, true, Some(e.to_string()))
                                .await?;
                            return Err(e);
                        }
                    };
                    buffer.complete(ticket, outcomes)?;

                    for row_outcomes in buffer.drain_ready() {
                        rows_done += 1;
                        self.settle_row(
                            &processor, &checkpoints, &auditor, &mut report, row_outcomes,
                            rows_done,
                        )
                        .await?;

                        if let Some(threshold) = self.failure_threshold {
                            if report.failed > threshold {
                                warn!(
                                    run = %run_id,
                                    failed = report.failed,
                                    threshold,
                                    "failure threshold exceeded, aborting run"
                                );
                                buffer.shutdown();
                                report.aborted = true;
                                report.abort_reason = Some(format!(
                                    "failure threshold exceeded: {} rows failed (threshold {threshold})",
                                    report.failed
                                ));
                                break 'run;
                            }
                        }
                    }
                }

                _ = sweep.tick() => {
                    let swept = processor.sweep_timeouts().await?;
                    if !swept.is_empty() {
                        self.settle_row(
                            &processor, &checkpoints, &auditor, &mut report, swept, rows_done,
                        )
                        .await?;
                    }
                }
            }
        }

        // Everything completed before shutdown is still released in order
        for row_outcomes in buffer.drain_ready() {
            rows_done += 1;
            self.settle_row(
                &processor, &checkpoints, &auditor, &mut report, row_outcomes, rows_done,
            )
            .await?;
        }

        if !report.aborted {
            // Timed-out batches flush as such before the unconditional
            // end-of-run flush takes whatever is left
            let swept = processor.sweep_timeouts().await?;
            if !swept.is_empty() {
                self.settle_row(&processor, &checkpoints, &auditor, &mut report, swept, rows_done)
                    .await?;
            }
            let flushed = processor.flush_all().await?;
            if !flushed.is_empty() {
                self.settle_row(
                    &processor, &checkpoints, &auditor, &mut report, flushed, rows_done,
                )
                .await?;
            }
            processor.flush_sinks().await?;
        }
        processor.close_sinks().await?;
        source.close().await?;

        let aborted = report.aborted;
        let reason = report.abort_reason.clone();
        self.finish_report(&auditor, &mut report, aborted, reason)
            .await?;
        Ok(report)
    }

    /// Tally one batch of terminal outcomes and persist its safe boundary.
    ///
    /// `rows_done` is the source-row cursor stored in the checkpoint; settles
    /// for sweeps and end-of-run flushes pass it unchanged so resume never
    /// skips a row that was still unprocessed at the crash.
    async fn settle_row(
        &self,
        processor: &RowProcessor,
        checkpoints: &crate::checkpointing::CheckpointManager,
        auditor: &Auditor,
        report: &mut RunReport,
        outcomes: Vec<RowOutcome>,
        rows_done: u64,
    ) -> Result<()> {
        let Some(last) = outcomes.last().cloned() else {
            return Ok(());
        };
        for outcome in &outcomes {
            match outcome.state {
                TerminalState::Completed => report.completed += 1,
                TerminalState::Failed => report.failed += 1,
                TerminalState::Quarantined => report.quarantined += 1,
                TerminalState::ConsumedInBatch => report.consumed_in_batch += 1,
            }
        }

        let snapshots = processor.aggregation_snapshots().await;
        let aggregation = if snapshots.is_empty() {
            None
        } else {
            Some(
                snapshots
                    .into_iter()
                    .map(|(node_id, (rows, member_tokens, first_accept_ms))| {
                        (
                            node_id.clone(),
                            AggregationSnapshot {
                                node_id,
                                rows,
                                member_tokens,
                                first_accept_ms,
                            },
                        )
                    })
                    .collect(),
            )
        };

        let sequence = checkpoints
            .record(&last.token_id, &last.node_id, rows_done, aggregation, auditor)
            .await?;
        report.last_checkpoint = Some((last.node_id, sequence));
        Ok(())
    }

    async fn finish_report(
        &self,
        auditor: &Auditor,
        report: &mut RunReport,
        aborted: bool,
        reason: Option<String>,
    ) -> Result<()> {
        report.aborted = aborted;
        if report.abort_reason.is_none() {
            report.abort_reason = reason;
        }
        info!(
            run = %report.run_id,
            completed = report.completed,
            failed = report.failed,
            quarantined = report.quarantined,
            aborted = report.aborted,
            "run finished"
        );
        auditor
            .emit(AuditEvent::RunFinished {
                run_id: report.run_id.clone(),
                completed: report.completed,
                failed: report.failed,
                quarantined: report.quarantined,
                aborted: report.aborted,
            })
            .await
    }
}

/// Stable row identity: the payload's `id` field when present, otherwise the
/// source position
fn row_identity(data: &Value, index: u64) -> String {
    match data.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => format!("row-{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::SystemClock;
    use crate::graph::{GraphBuilder, NodeKind, NodeSpec};
    use crate::plugin::{ProcessOutcome, SinkPlugin, SourcePlugin, TransformPlugin};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use parking_lot::Mutex;
    use provenance_checkpoint::MemoryCheckpointStore;
    use serde_json::json;

    struct VecSource {
        records: Vec<SourceRecord>,
    }

    #[async_trait]
    impl SourcePlugin for VecSource {
        async fn load(&self, _ctx: &PluginContext) -> Result<BoxStream<'static, SourceRecord>> {
            Ok(stream::iter(self.records.clone()).boxed())
        }
    }

    struct Passthrough;

    #[async_trait]
    impl TransformPlugin for Passthrough {
        async fn process(&self, row: &Value, _ctx: &PluginContext) -> Result<ProcessOutcome> {
            Ok(ProcessOutcome::Success(row.clone()))
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        rows: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl SinkPlugin for CollectingSink {
        async fn write(&self, rows: &[Value], _ctx: &PluginContext) -> Result<()> {
            self.rows.lock().extend_from_slice(rows);
            Ok(())
        }
    }

    fn linear_setup_with_transform(
        records: Vec<SourceRecord>,
        transform: Arc<dyn TransformPlugin>,
    ) -> (Orchestrator, Arc<CollectingSink>, Arc<MemoryAuditSink>) {
        let mut builder = GraphBuilder::new();
        let source = builder.add_node(NodeSpec::new("reader", NodeKind::Source, "vec"));
        let shape = builder.add_node(NodeSpec::new("shape", NodeKind::Transform, "pass"));
        let sink_node = builder.add_node(NodeSpec::new("writer", NodeKind::Sink, "collect"));
        builder.add_edge(&source, &shape, "out");
        builder.add_edge(&shape, &sink_node, "out");
        let graph = Arc::new(builder.build().unwrap());

        let sink = Arc::new(CollectingSink::default());
        let mut registry = PluginRegistry::new();
        registry.register_source("vec", Arc::new(VecSource { records }));
        registry.register_transform("pass", transform);
        registry.register_sink("collect", sink.clone());

        let audit = Arc::new(MemoryAuditSink::new());
        let orchestrator = Orchestrator::new(
            graph,
            Arc::new(registry),
            Arc::new(MemoryCheckpointStore::new()),
            audit.clone(),
            Arc::new(SystemClock::new()),
        );
        (orchestrator, sink, audit)
    }

    fn linear_setup(
        records: Vec<SourceRecord>,
    ) -> (Orchestrator, Arc<CollectingSink>, Arc<MemoryAuditSink>) {
        linear_setup_with_transform(records, Arc::new(Passthrough))
    }

    #[tokio::test]
    async fn test_run_processes_all_rows_in_order() {
        let records = (0..5)
            .map(|i| SourceRecord::Row(json!({"id": format!("r{i}"), "n": i})))
            .collect();
        let (orchestrator, sink, audit) = linear_setup(records);

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.completed, 5);
        assert_eq!(report.failed, 0);
        assert!(!report.aborted);
        assert!(report.last_checkpoint.is_some());

        let written: Vec<i64> = sink
            .rows
            .lock()
            .iter()
            .map(|v| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(written, vec![0, 1, 2, 3, 4]);

        let finished = audit.events_where(|e| matches!(e, AuditEvent::RunFinished { .. }));
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn test_quarantined_rows_counted_not_processed() {
        let records = vec![
            SourceRecord::Row(json!({"id": "good"})),
            SourceRecord::Quarantine {
                raw: json!({"id": "bad"}),
                reason: "unparseable".to_string(),
            },
        ];
        let (orchestrator, sink, audit) = linear_setup(records);

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.quarantined, 1);
        assert_eq!(sink.rows.lock().len(), 1);
        let quarantines = audit.events_where(|e| matches!(e, AuditEvent::RowQuarantined { .. }));
        assert_eq!(quarantines.len(), 1);
    }

    /// Sleeps `base_ms - step_ms * n` per row, so with a nonzero step the
    /// later rows finish first
    struct StaggeredSleeper {
        base_ms: u64,
        step_ms: u64,
    }

    #[async_trait]
    impl TransformPlugin for StaggeredSleeper {
        async fn process(&self, row: &Value, _ctx: &PluginContext) -> Result<ProcessOutcome> {
            let n = row["n"].as_u64().unwrap_or(0);
            let delay = self.base_ms.saturating_sub(self.step_ms * n);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(ProcessOutcome::Success(row.clone()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rows_process_concurrently() {
        let records = (0..4)
            .map(|i| SourceRecord::Row(json!({"id": format!("r{i}"), "n": i})))
            .collect();
        let (orchestrator, _sink, _audit) = linear_setup_with_transform(
            records,
            Arc::new(StaggeredSleeper {
                base_ms: 50,
                step_ms: 0,
            }),
        );

        let started = tokio::time::Instant::now();
        let report = orchestrator.run().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(report.completed, 4);
        // Four 50ms rows dispatched onto tasks overlap; run serially they
        // would take 200ms of virtual time
        assert!(elapsed < Duration::from_millis(150), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_completion_checkpoints_in_source_order() {
        let records = (0..4)
            .map(|i| SourceRecord::Row(json!({"id": format!("r{i}"), "n": i})))
            .collect();
        let (orchestrator, _sink, audit) = linear_setup_with_transform(
            records,
            Arc::new(StaggeredSleeper {
                base_ms: 50,
                step_ms: 10,
            }),
        );

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.completed, 4);

        // r3 finishes first and r0 last, yet the checkpoint trail walks the
        // rows in source order
        let token_rows: HashMap<String, String> = audit
            .events_where(|e| matches!(e, AuditEvent::TerminalOutcome { .. }))
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::TerminalOutcome {
                    token_id, row_id, ..
                } => Some((token_id, row_id)),
                _ => None,
            })
            .collect();
        let checkpointed: Vec<String> = audit
            .events_where(|e| matches!(e, AuditEvent::CheckpointPersisted { .. }))
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::CheckpointPersisted { token_id, .. } => {
                    token_rows.get(&token_id).cloned()
                }
                _ => None,
            })
            .collect();
        assert_eq!(checkpointed, vec!["r0", "r1", "r2", "r3"]);
    }

    struct AlwaysFails;

    #[async_trait]
    impl TransformPlugin for AlwaysFails {
        async fn process(&self, _row: &Value, _ctx: &PluginContext) -> Result<ProcessOutcome> {
            Ok(ProcessOutcome::Failed {
                reason: "bad row".to_string(),
                retryable: false,
            })
        }
    }

    #[tokio::test]
    async fn test_failure_threshold_aborts_run() {
        let records: Vec<SourceRecord> = (0..10)
            .map(|i| SourceRecord::Row(json!({"id": format!("r{i}")})))
            .collect();
        let (mut orchestrator, _sink, _audit) = linear_setup(records);
        let mut registry = PluginRegistry::new();
        registry.register_source(
            "vec",
            Arc::new(VecSource {
                records: (0..10)
                    .map(|i| SourceRecord::Row(json!({"id": format!("r{i}")})))
                    .collect(),
            }),
        );
        registry.register_transform("pass", Arc::new(AlwaysFails));
        registry.register_sink("collect", Arc::new(CollectingSink::default()));
        orchestrator.registry = Arc::new(registry);
        let orchestrator = orchestrator.with_failure_threshold(2);

        let report = orchestrator.run().await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.failed, 3);
        assert!(report
            .abort_reason
            .as_deref()
            .unwrap()
            .contains("failure threshold"));
    }
}
