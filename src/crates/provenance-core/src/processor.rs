//! RowProcessor: the DAG Navigator
//!
//! The engine's central state machine. Each in-flight token moves through
//! PENDING (queued) → EXECUTING (inside an executor call) → ROUTED
//! (successors enqueued) or WAITING_AT_COALESCE (parked until siblings
//! arrive), ending in a terminal state: COMPLETED, FAILED, QUARANTINED, or
//! CONSUMED_IN_BATCH. Traversal is an explicit [`WorkItem`] queue rather
//! than recursion, so fork fan-out never grows the call stack and the queue
//! itself can be inspected and bounded.
//!
//! ```text
//!  ┌─────────┐ dequeue ┌───────────┐ outcome ┌────────┐ edge table
//!  │ PENDING ├────────>│ EXECUTING ├────────>│ ROUTED ├──> new WorkItems
//!  └─────────┘         └─────┬─────┘         └───┬────┘
//!                            │ pending            │ coalesce, siblings missing
//!                            ▼                    ▼
//!                      re-enqueued        WAITING_AT_COALESCE
//!                      with resume state          │ contract satisfied
//!                                                 ▼
//!                                              PENDING (merged token)
//! ```
//!
//! Routing is strict: every label an executor emits must resolve through the
//! edge table, and an unresolved label is a fatal integrity error, never a
//! silent drop. Total queue iterations per drive are capped; exceeding the
//! ceiling is reported as a routing loop instead of an infinite hang.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, Auditor};
use crate::clock::Clock;
use crate::error::{PipelineError, Result};
use crate::executors::{
    AggregationExecutor, CoalesceExecutor, ExecutorAction, GateExecutor, SinkExecutor,
    TransformExecutor,
};
use crate::graph::{ExecutionGraph, Node, NodeId, NodeKind};
use crate::plugin::{PluginContext, PluginRegistry};
use crate::retry::{RetryPolicy, RetryState};
use crate::throttle::AimdThrottle;
use crate::token::{RowId, Token, TokenId, TokenManager};
use crate::trigger::{AggregationBatch, FiredTrigger, TriggerConfig};

/// One scheduling unit: a token bound for a node
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub token: Token,
    pub node_id: NodeId,
    /// State handed back by a pending outcome at this node
    pub resume_state: Option<Value>,
}

impl WorkItem {
    fn new(token: Token, node_id: NodeId) -> Self {
        Self {
            token,
            node_id,
            resume_state: None,
        }
    }
}

/// Terminal state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Completed,
    Failed,
    Quarantined,
    ConsumedInBatch,
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalState::Completed => write!(f, "completed"),
            TerminalState::Failed => write!(f, "failed"),
            TerminalState::Quarantined => write!(f, "quarantined"),
            TerminalState::ConsumedInBatch => write!(f, "consumed_in_batch"),
        }
    }
}

/// How one token ended, reported back to the orchestrator
#[derive(Debug, Clone)]
pub struct RowOutcome {
    pub row_id: RowId,
    pub token_id: TokenId,
    pub node_id: NodeId,
    pub state: TerminalState,
    pub reason: Option<String>,
}

/// Drives tokens through the graph until every one is terminal.
///
/// All methods take `&self` so one processor can be shared across the
/// orchestrator's row tasks. The executor tables are read-only after
/// construction; token lineage, aggregation batches, and coalesce parking
/// live behind async mutexes held only for the mutation itself, never across
/// a plugin call.
pub struct RowProcessor {
    graph: Arc<ExecutionGraph>,
    run_id: String,
    clock: Arc<dyn Clock>,
    auditor: Auditor,
    manager: Mutex<TokenManager>,
    retry_policy: RetryPolicy,
    max_iterations: u64,
    entry_node: NodeId,

    transforms: HashMap<NodeId, TransformExecutor>,
    gates: HashMap<NodeId, GateExecutor>,
    sinks: HashMap<NodeId, SinkExecutor>,
    aggregations: Mutex<HashMap<NodeId, AggregationExecutor>>,

    /// Tokens parked at a coalesce node, keyed by (node, lineage group)
    coalesce_waits: Mutex<HashMap<(NodeId, String), Vec<Token>>>,
    /// One shared throttle per external service name
    throttles: HashMap<String, Arc<AimdThrottle>>,
}

impl RowProcessor {
    /// Resolve every node's plugin up front so a missing registration fails
    /// at build time, not mid-run. `triggers` overrides the per-node trigger
    /// configuration parsed from node config.
    pub fn new(
        graph: Arc<ExecutionGraph>,
        registry: &PluginRegistry,
        run_id: impl Into<String>,
        clock: Arc<dyn Clock>,
        auditor: Auditor,
        retry_policy: RetryPolicy,
        mut triggers: HashMap<NodeId, TriggerConfig>,
    ) -> Result<Self> {
        let source = graph.source()?;
        let entry_node = graph.default_successor(&source.id)?.to.clone();

        let mut transforms = HashMap::new();
        let mut gates = HashMap::new();
        let mut sinks = HashMap::new();
        let mut aggregations = HashMap::new();
        let mut throttles = HashMap::new();

        for node in graph.nodes() {
            if let Some(service) = service_name(node) {
                throttles
                    .entry(service.to_string())
                    .or_insert_with(|| Arc::new(AimdThrottle::new()));
            }
            match node.spec.kind {
                NodeKind::Transform => {
                    let plugin = registry.transform(&node.spec.plugin)?;
                    transforms.insert(node.id.clone(), TransformExecutor::new(plugin));
                }
                NodeKind::Gate => {
                    let plugin = registry.gate(&node.spec.plugin)?;
                    gates.insert(node.id.clone(), GateExecutor::new(plugin));
                }
                NodeKind::Sink => {
                    let plugin = registry.sink(&node.spec.plugin)?;
                    sinks.insert(node.id.clone(), SinkExecutor::new(plugin));
                }
                NodeKind::Aggregation => {
                    let config = triggers
                        .remove(&node.id)
                        .unwrap_or_else(|| trigger_from_config(&node.spec.config));
                    aggregations.insert(
                        node.id.clone(),
                        AggregationExecutor::new(AggregationBatch::new(config, clock.clone())),
                    );
                }
                NodeKind::Source | NodeKind::Coalesce => {}
            }
        }

        Ok(Self {
            graph,
            run_id: run_id.into(),
            clock,
            auditor,
            manager: Mutex::new(TokenManager::new()),
            retry_policy,
            max_iterations: 1_000,
            entry_node,
            transforms,
            gates,
            sinks,
            aggregations: Mutex::new(aggregations),
            coalesce_waits: Mutex::new(HashMap::new()),
            throttles,
        })
    }

    /// Override the per-drive work-queue iteration ceiling
    pub fn with_max_iterations(mut self, ceiling: u64) -> Self {
        self.max_iterations = ceiling.max(1);
        self
    }

    /// Shared throttle for one service name, if any node declared it
    pub fn throttle(&self, service: &str) -> Option<Arc<AimdThrottle>> {
        self.throttles.get(service).cloned()
    }

    /// Mint a token for one ingested source row and drive it (and everything
    /// it spawns) to terminal states.
    pub async fn process_row(
        &self,
        row_id: impl Into<RowId>,
        data: Value,
    ) -> Result<Vec<RowOutcome>> {
        let token = self.manager.lock().await.mint(row_id, data);
        let mut queue = VecDeque::new();
        queue.push_back(WorkItem::new(token, self.entry_node.clone()));
        let mut outcomes = Vec::new();
        self.drive(&mut queue, &mut outcomes).await?;
        Ok(outcomes)
    }

    /// Flush aggregation batches whose timeout trigger fired while no rows
    /// were arriving. Run by the orchestrator on its sweep interval.
    pub async fn sweep_timeouts(&self) -> Result<Vec<RowOutcome>> {
        let flushes: Vec<(NodeId, Vec<Token>, FiredTrigger)> = {
            let mut aggregations = self.aggregations.lock().await;
            aggregations
                .iter_mut()
                .filter_map(|(node_id, agg)| {
                    agg.flush_if_triggered()
                        .map(|(tokens, trigger)| (node_id.clone(), tokens, trigger))
                })
                .collect()
        };
        self.drive_flushes(flushes).await
    }

    /// Unconditionally flush every non-empty batch at end-of-run
    pub async fn flush_all(&self) -> Result<Vec<RowOutcome>> {
        let flushes: Vec<(NodeId, Vec<Token>, FiredTrigger)> = {
            let mut aggregations = self.aggregations.lock().await;
            aggregations
                .iter_mut()
                .filter_map(|(node_id, agg)| {
                    agg.flush_remaining()
                        .map(|(tokens, trigger)| (node_id.clone(), tokens, trigger))
                })
                .collect()
        };
        self.drive_flushes(flushes).await
    }

    async fn drive_flushes(
        &self,
        flushes: Vec<(NodeId, Vec<Token>, FiredTrigger)>,
    ) -> Result<Vec<RowOutcome>> {
        let mut queue = VecDeque::new();
        let mut outcomes = Vec::new();
        for (node_id, tokens, trigger) in flushes {
            self.emit_flush(&node_id, tokens, trigger, &mut queue)
                .await?;
        }
        self.drive(&mut queue, &mut outcomes).await?;
        Ok(outcomes)
    }

    /// Tokens still parked at coalesce nodes; nonzero after a run means an
    /// upstream branch never arrived
    pub async fn waiting_at_coalesce(&self) -> usize {
        self.coalesce_waits.lock().await.values().map(Vec::len).sum()
    }

    /// Flush every sink plugin
    pub async fn flush_sinks(&self) -> Result<()> {
        for sink in self.sinks.values() {
            sink.flush().await?;
        }
        Ok(())
    }

    /// Close every sink plugin (idempotent per protocol)
    pub async fn close_sinks(&self) -> Result<()> {
        for sink in self.sinks.values() {
            sink.close().await?;
        }
        Ok(())
    }

    async fn drive(
        &self,
        queue: &mut VecDeque<WorkItem>,
        outcomes: &mut Vec<RowOutcome>,
    ) -> Result<()> {
        let mut iterations: u64 = 0;
        while let Some(item) = queue.pop_front() {
            iterations += 1;
            if iterations > self.max_iterations {
                return Err(PipelineError::RoutingLoop {
                    row_id: item.token.row_id.clone(),
                    iterations,
                });
            }
            debug!(
                node = %item.node_id,
                token = %item.token.token_id,
                row = %item.token.row_id,
                "dispatching work item"
            );
            self.step(item, queue, outcomes).await?;
        }
        Ok(())
    }

    async fn step(
        &self,
        item: WorkItem,
        queue: &mut VecDeque<WorkItem>,
        outcomes: &mut Vec<RowOutcome>,
    ) -> Result<()> {
        let node = self
            .graph
            .node(&item.node_id)
            .ok_or_else(|| {
                PipelineError::integrity(format!(
                    "work item targets unknown node '{}'",
                    item.node_id
                ))
            })?
            .clone();

        match node.spec.kind {
            NodeKind::Transform | NodeKind::Gate => {
                let action = self.execute_with_retry(&node, &item).await?;
                self.apply_action(&node, action, queue, outcomes).await
            }
            NodeKind::Sink => {
                let ctx = self.context(&node, None);
                let sink = self.sinks.get(&node.id).ok_or_else(|| {
                    PipelineError::Configuration(format!("no sink executor for '{}'", node.id))
                })?;
                sink.deliver(&item.token, &ctx, &self.auditor).await?;
                self.finish(
                    &item.token,
                    &node.id,
                    TerminalState::Completed,
                    None,
                    outcomes,
                )
                .await
            }
            NodeKind::Aggregation => {
                let ctx = self.context(&node, None);
                let token = item.token.clone();
                // Accept and the flush check happen under one lock so two
                // concurrent arrivals cannot both observe a fired trigger
                let flushed = {
                    let mut aggregations = self.aggregations.lock().await;
                    let agg = aggregations.get_mut(&node.id).ok_or_else(|| {
                        PipelineError::Configuration(format!(
                            "no aggregation state for '{}'",
                            node.id
                        ))
                    })?;
                    agg.accept(token, &ctx, &self.auditor).await?;
                    agg.flush_if_triggered()
                };
                self.finish(
                    &item.token,
                    &node.id,
                    TerminalState::ConsumedInBatch,
                    None,
                    outcomes,
                )
                .await?;

                if let Some((tokens, trigger)) = flushed {
                    self.emit_flush(&node.id, tokens, trigger, queue).await?;
                }
                Ok(())
            }
            NodeKind::Coalesce => self.arrive_at_coalesce(&node, item.token, queue).await,
            NodeKind::Source => Err(PipelineError::integrity(format!(
                "token '{}' routed into source node '{}'",
                item.token.token_id, node.id
            ))),
        }
    }

    /// Run a transform or gate, cycling plugin-classified retryable failures
    /// through the retry policy and the service throttle.
    async fn execute_with_retry(&self, node: &Node, item: &WorkItem) -> Result<ExecutorAction> {
        let ctx = self.context(node, item.resume_state.clone());
        let service = service_name(node);
        let throttle = service.and_then(|s| self.throttles.get(s));
        let mut retry = RetryState::new();

        loop {
            if let Some(throttle) = throttle {
                throttle.acquire().await;
            }

            let action = match node.spec.kind {
                NodeKind::Transform => {
                    let executor = self.transforms.get(&node.id).ok_or_else(|| {
                        PipelineError::Configuration(format!(
                            "no transform executor for '{}'",
                            node.id
                        ))
                    })?;
                    executor.execute(&item.token, &ctx, &self.auditor).await?
                }
                NodeKind::Gate => {
                    let executor = self.gates.get(&node.id).ok_or_else(|| {
                        PipelineError::Configuration(format!("no gate executor for '{}'", node.id))
                    })?;
                    executor.execute(&item.token, &ctx, &self.auditor).await?
                }
                _ => {
                    return Err(PipelineError::integrity(format!(
                        "retry path invoked for non-executable node '{}'",
                        node.id
                    )))
                }
            };

            match action {
                ExecutorAction::Fail {
                    token,
                    reason,
                    retryable: true,
                } => {
                    if let (Some(service), Some(throttle)) = (service, throttle) {
                        throttle.on_failure();
                        self.auditor
                            .emit(AuditEvent::ExternalCall {
                                run_id: self.run_id.clone(),
                                node_id: node.id.clone(),
                                service: service.to_string(),
                                succeeded: false,
                            })
                            .await?;
                    }
                    retry.record_attempt(Some(reason.clone()));
                    if retry.allows_retry(&self.retry_policy) {
                        let delay = self.retry_policy.calculate_delay(retry.attempts - 1);
                        warn!(
                            node = %node.id,
                            token = %token.token_id,
                            attempt = retry.attempts,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "transient failure, retrying"
                        );
                        self.auditor
                            .emit(AuditEvent::RetryScheduled {
                                run_id: self.run_id.clone(),
                                token_id: token.token_id.clone(),
                                node_id: node.id.clone(),
                                attempt: retry.attempts,
                                reason: reason.clone(),
                            })
                            .await?;
                        retry.record_wait(delay);
                        sleep(delay).await;
                        continue;
                    }
                    return Ok(ExecutorAction::Fail {
                        token,
                        reason: format!(
                            "retry budget exhausted after {} attempts: {reason}",
                            retry.attempts
                        ),
                        retryable: false,
                    });
                }
                other => {
                    if let (Some(service), Some(throttle)) = (service, throttle) {
                        if !matches!(other, ExecutorAction::Fail { .. }) {
                            throttle.on_success();
                        }
                        self.auditor
                            .emit(AuditEvent::ExternalCall {
                                run_id: self.run_id.clone(),
                                node_id: node.id.clone(),
                                service: service.to_string(),
                                succeeded: !matches!(other, ExecutorAction::Fail { .. }),
                            })
                            .await?;
                    }
                    return Ok(other);
                }
            }
        }
    }

    async fn apply_action(
        &self,
        node: &Node,
        action: ExecutorAction,
        queue: &mut VecDeque<WorkItem>,
        outcomes: &mut Vec<RowOutcome>,
    ) -> Result<()> {
        match action {
            ExecutorAction::Continue(token) => {
                let edge = self.graph.default_successor(&node.id)?;
                let (to, label) = (edge.to.clone(), edge.label.clone());
                self.route(node, token, to, label, queue).await
            }
            ExecutorAction::Route { label, token } => {
                let edge = self.graph.resolve(&node.id, &label)?;
                let to = edge.to.clone();
                self.route(node, token, to, label, queue).await
            }
            ExecutorAction::Fork { branches, token } => {
                // Every branch name must resolve before any child is minted
                let mut targets = Vec::with_capacity(branches.len());
                for branch in &branches {
                    targets.push(self.graph.resolve(&node.id, branch)?.to.clone());
                }
                let children = self.manager.lock().await.fork(&token, &branches)?;
                self.auditor
                    .emit(AuditEvent::TokenForked {
                        run_id: self.run_id.clone(),
                        parent_token_id: token.token_id.clone(),
                        fork_group: children[0].fork_group.clone().unwrap_or_default(),
                        branches: branches.clone(),
                        child_token_ids: children.iter().map(|c| c.token_id.clone()).collect(),
                    })
                    .await?;
                for (child, to) in children.into_iter().zip(targets) {
                    let label = child.branch.clone().unwrap_or_default();
                    self.route(node, child, to, label, queue).await?;
                }
                Ok(())
            }
            ExecutorAction::Expand { rows, token } => {
                let edge = self.graph.default_successor(&node.id)?;
                let (to, label) = (edge.to.clone(), edge.label.clone());
                let children = self.manager.lock().await.expand(&token, rows)?;
                self.auditor
                    .emit(AuditEvent::TokenExpanded {
                        run_id: self.run_id.clone(),
                        parent_token_id: token.token_id.clone(),
                        expand_group: children[0].expand_group.clone().unwrap_or_default(),
                        child_token_ids: children.iter().map(|c| c.token_id.clone()).collect(),
                    })
                    .await?;
                for child in children {
                    self.route(node, child, to.clone(), label.clone(), queue)
                        .await?;
                }
                Ok(())
            }
            ExecutorAction::Suspend {
                token,
                resume_state,
            } => {
                self.auditor
                    .emit(AuditEvent::TokenSuspended {
                        run_id: self.run_id.clone(),
                        token_id: token.token_id.clone(),
                        node_id: node.id.clone(),
                    })
                    .await?;
                queue.push_back(WorkItem {
                    token,
                    node_id: node.id.clone(),
                    resume_state: Some(resume_state),
                });
                Ok(())
            }
            ExecutorAction::Fail {
                token,
                reason,
                retryable: _,
            } => {
                self.finish(&token, &node.id, TerminalState::Failed, Some(reason), outcomes)
                    .await
            }
        }
    }

    async fn route(
        &self,
        from: &Node,
        token: Token,
        to: NodeId,
        label: String,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<()> {
        self.auditor
            .emit(AuditEvent::Routed {
                run_id: self.run_id.clone(),
                token_id: token.token_id.clone(),
                from_node: from.id.clone(),
                to_node: to.clone(),
                label,
            })
            .await?;
        queue.push_back(WorkItem::new(token, to));
        Ok(())
    }

    async fn arrive_at_coalesce(
        &self,
        node: &Node,
        token: Token,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<()> {
        let group = token
            .group()
            .ok_or_else(|| {
                PipelineError::integrity(format!(
                    "token '{}' arrived at coalesce '{}' without a lineage group",
                    token.token_id, node.id
                ))
            })?
            .to_string();
        let expected = self
            .manager
            .lock()
            .await
            .expected_members(&group)
            .ok_or_else(|| {
                PipelineError::integrity(format!(
                    "no open fork/expand contract for group '{group}' at coalesce '{}'",
                    node.id
                ))
            })?;

        let key = (node.id.clone(), group);
        let members = {
            let mut waits = self.coalesce_waits.lock().await;
            let waiting = waits.entry(key.clone()).or_default();
            waiting.push(token);
            if waiting.len() < expected {
                return Ok(());
            }
            waits.remove(&key).unwrap_or_default()
        };

        // Contract satisfied: merge and continue downstream
        let ctx = self.context(node, None);
        let merged = {
            let mut manager = self.manager.lock().await;
            CoalesceExecutor::join(&mut manager, &members, &ctx, &self.auditor).await?
        };
        let edge = self.graph.default_successor(&node.id)?;
        let (to, label) = (edge.to.clone(), edge.label.clone());
        self.route(node, merged, to, label, queue).await
    }

    async fn emit_flush(
        &self,
        node_id: &NodeId,
        tokens: Vec<Token>,
        trigger: FiredTrigger,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<()> {
        let member_ids: Vec<String> = tokens.iter().map(|t| t.token_id.clone()).collect();
        let payloads: Vec<Value> = tokens.into_iter().map(|t| t.data).collect();
        let batch_token = self
            .manager
            .lock()
            .await
            .mint(format!("batch-{}", Uuid::new_v4()), Value::Array(payloads));

        self.auditor
            .emit(AuditEvent::BatchFlushed {
                run_id: self.run_id.clone(),
                node_id: node_id.clone(),
                trigger: trigger.to_string(),
                member_token_ids: member_ids,
                batch_token_id: batch_token.token_id.clone(),
            })
            .await?;

        let node = self.graph.node(node_id).ok_or_else(|| {
            PipelineError::integrity(format!("flush from unknown node '{node_id}'"))
        })?;
        let edge = self.graph.default_successor(node_id)?;
        let (to, label) = (edge.to.clone(), edge.label.clone());
        let node = node.clone();
        self.route(&node, batch_token, to, label, queue).await
    }

    async fn finish(
        &self,
        token: &Token,
        node_id: &NodeId,
        state: TerminalState,
        reason: Option<String>,
        outcomes: &mut Vec<RowOutcome>,
    ) -> Result<()> {
        self.auditor
            .emit(AuditEvent::TerminalOutcome {
                run_id: self.run_id.clone(),
                token_id: token.token_id.clone(),
                row_id: token.row_id.clone(),
                outcome: state.to_string(),
                node_id: node_id.clone(),
                reason: reason.clone(),
            })
            .await?;
        outcomes.push(RowOutcome {
            row_id: token.row_id.clone(),
            token_id: token.token_id.clone(),
            node_id: node_id.clone(),
            state,
            reason,
        });
        Ok(())
    }

    fn context(&self, node: &Node, resume_state: Option<Value>) -> PluginContext {
        let mut ctx = PluginContext::new(
            self.run_id.clone(),
            node.id.clone(),
            node.spec.config.clone(),
            self.clock.clone(),
        );
        if let Some(state) = resume_state {
            ctx = ctx.with_resume_state(state);
        }
        ctx
    }

    /// Snapshot of aggregation state for checkpointing
    pub async fn aggregation_snapshots(
        &self,
    ) -> HashMap<NodeId, (Vec<Value>, Vec<TokenId>, Option<u64>)> {
        self.aggregations
            .lock()
            .await
            .iter()
            .filter(|(_, agg)| !agg.batch().is_empty())
            .map(|(id, agg)| {
                let rows = agg.batch().tokens().iter().map(|t| t.data.clone()).collect();
                let members = agg
                    .batch()
                    .tokens()
                    .iter()
                    .map(|t| t.token_id.clone())
                    .collect();
                (
                    id.clone(),
                    (rows, members, agg.batch().evaluator().first_accept_ms()),
                )
            })
            .collect()
    }

    /// Restore one aggregation node's buffered batch from a checkpoint
    pub async fn restore_aggregation(
        &self,
        node_id: &NodeId,
        rows: Vec<Value>,
        first_accept_ms: Option<u64>,
    ) -> Result<()> {
        let mut aggregations = self.aggregations.lock().await;
        let agg = aggregations.get_mut(node_id).ok_or_else(|| {
            PipelineError::Configuration(format!(
                "checkpoint references aggregation node '{node_id}' with no state"
            ))
        })?;
        let count = rows.len();
        let mut manager = self.manager.lock().await;
        for data in rows {
            let token = manager.mint(format!("restored-{}", Uuid::new_v4()), data);
            agg.batch_mut().accept(token);
        }
        agg.batch_mut().evaluator_mut().restore(count, first_accept_ms);
        Ok(())
    }
}

fn service_name(node: &Node) -> Option<&str> {
    node.spec.config.get("service").and_then(Value::as_str)
}

/// Parse count / timeout_ms trigger settings out of a node's config block
fn trigger_from_config(config: &Value) -> TriggerConfig {
    let mut trigger = TriggerConfig::new();
    if let Some(block) = config.get("trigger") {
        if let Some(count) = block.get("count").and_then(Value::as_u64) {
            trigger = trigger.with_count(count as usize);
        }
        if let Some(ms) = block.get("timeout_ms").and_then(Value::as_u64) {
            trigger = trigger.with_timeout(std::time::Duration::from_millis(ms));
        }
    }
    trigger
}
