//! Executors: one plugin call, one classified action, audit on both sides
//!
//! Each executor wraps exactly one plugin invocation for its node kind,
//! interprets the tagged [`ProcessOutcome`] into an [`ExecutorAction`] the
//! Navigator can route, and records node entry/exit in the audit trail.
//! Executors never touch the work queue or the edge table; routing stays in
//! the row processor.

use serde_json::Value;
use std::sync::Arc;

use crate::audit::{AuditEvent, Auditor};
use crate::error::Result;
use crate::plugin::{
    GatePlugin, PluginContext, ProcessOutcome, SinkPlugin, TransformPlugin,
};
use crate::token::{Token, TokenManager};
use crate::trigger::{AggregationBatch, FiredTrigger};

/// What the Navigator should do with a token after one executor call
#[derive(Debug, Clone)]
pub enum ExecutorAction {
    /// Follow the default edge with the (possibly updated) token
    Continue(Token),
    /// Follow the named edge
    Route { label: String, token: Token },
    /// Fork the token down each named path
    Fork { branches: Vec<String>, token: Token },
    /// Expand the token into independent children, one per payload
    Expand { rows: Vec<Value>, token: Token },
    /// Park the token; re-dispatch later with this resume state
    Suspend { token: Token, resume_state: Value },
    /// Plugin-classified failure
    Fail {
        token: Token,
        reason: String,
        retryable: bool,
    },
}

fn classify(token: &Token, outcome: ProcessOutcome) -> ExecutorAction {
    match outcome {
        ProcessOutcome::Success(data) => ExecutorAction::Continue(token.with_updated_data(data)),
        ProcessOutcome::Continue => ExecutorAction::Continue(token.clone()),
        ProcessOutcome::Route { label, data } => ExecutorAction::Route {
            label,
            token: token.with_updated_data(data),
        },
        ProcessOutcome::ForkToPaths { branches, data } => ExecutorAction::Fork {
            branches,
            token: token.with_updated_data(data),
        },
        ProcessOutcome::Expand { rows } => ExecutorAction::Expand {
            rows,
            token: token.clone(),
        },
        ProcessOutcome::Pending { resume_state } => ExecutorAction::Suspend {
            token: token.clone(),
            resume_state,
        },
        ProcessOutcome::Failed { reason, retryable } => ExecutorAction::Fail {
            token: token.clone(),
            reason,
            retryable,
        },
    }
}

fn action_label(action: &ExecutorAction) -> &'static str {
    match action {
        ExecutorAction::Continue(_) => "continue",
        ExecutorAction::Route { .. } => "route",
        ExecutorAction::Fork { .. } => "fork",
        ExecutorAction::Expand { .. } => "expand",
        ExecutorAction::Suspend { .. } => "pending",
        ExecutorAction::Fail { .. } => "failed",
    }
}

pub struct TransformExecutor {
    plugin: Arc<dyn TransformPlugin>,
}

impl TransformExecutor {
    pub fn new(plugin: Arc<dyn TransformPlugin>) -> Self {
        Self { plugin }
    }

    pub async fn execute(
        &self,
        token: &Token,
        ctx: &PluginContext,
        auditor: &Auditor,
    ) -> Result<ExecutorAction> {
        auditor
            .emit(AuditEvent::NodeEntered {
                run_id: ctx.run_id.clone(),
                token_id: token.token_id.clone(),
                row_id: token.row_id.clone(),
                node_id: ctx.node_id.clone(),
            })
            .await?;

        let outcome = self.plugin.process(&token.data, ctx).await?;
        let action = classify(token, outcome);

        auditor
            .emit(AuditEvent::NodeExited {
                run_id: ctx.run_id.clone(),
                token_id: token.token_id.clone(),
                node_id: ctx.node_id.clone(),
                outcome: action_label(&action).to_string(),
            })
            .await?;
        Ok(action)
    }
}

pub struct GateExecutor {
    plugin: Arc<dyn GatePlugin>,
}

impl GateExecutor {
    pub fn new(plugin: Arc<dyn GatePlugin>) -> Self {
        Self { plugin }
    }

    pub async fn execute(
        &self,
        token: &Token,
        ctx: &PluginContext,
        auditor: &Auditor,
    ) -> Result<ExecutorAction> {
        auditor
            .emit(AuditEvent::NodeEntered {
                run_id: ctx.run_id.clone(),
                token_id: token.token_id.clone(),
                row_id: token.row_id.clone(),
                node_id: ctx.node_id.clone(),
            })
            .await?;

        let outcome = self.plugin.process(&token.data, ctx).await?;
        let action = classify(token, outcome);

        auditor
            .emit(AuditEvent::NodeExited {
                run_id: ctx.run_id.clone(),
                token_id: token.token_id.clone(),
                node_id: ctx.node_id.clone(),
                outcome: action_label(&action).to_string(),
            })
            .await?;
        Ok(action)
    }
}

pub struct SinkExecutor {
    plugin: Arc<dyn SinkPlugin>,
}

impl SinkExecutor {
    pub fn new(plugin: Arc<dyn SinkPlugin>) -> Self {
        Self { plugin }
    }

    /// Write one token's payload and record the completed transition
    pub async fn deliver(
        &self,
        token: &Token,
        ctx: &PluginContext,
        auditor: &Auditor,
    ) -> Result<()> {
        auditor
            .emit(AuditEvent::NodeEntered {
                run_id: ctx.run_id.clone(),
                token_id: token.token_id.clone(),
                row_id: token.row_id.clone(),
                node_id: ctx.node_id.clone(),
            })
            .await?;

        self.plugin
            .write(std::slice::from_ref(&token.data), ctx)
            .await?;

        auditor
            .emit(AuditEvent::NodeExited {
                run_id: ctx.run_id.clone(),
                token_id: token.token_id.clone(),
                node_id: ctx.node_id.clone(),
                outcome: "written".to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.plugin.flush().await
    }

    pub async fn close(&self) -> Result<()> {
        self.plugin.close().await
    }
}

/// Buffers tokens at an aggregation node until a trigger fires
pub struct AggregationExecutor {
    batch: AggregationBatch,
}

impl AggregationExecutor {
    pub fn new(batch: AggregationBatch) -> Self {
        Self { batch }
    }

    pub async fn accept(
        &mut self,
        token: Token,
        ctx: &PluginContext,
        auditor: &Auditor,
    ) -> Result<()> {
        let token_id = token.token_id.clone();
        self.batch.accept(token);
        auditor
            .emit(AuditEvent::BatchAccepted {
                run_id: ctx.run_id.clone(),
                node_id: ctx.node_id.clone(),
                token_id,
                batch_size: self.batch.len(),
            })
            .await
    }

    /// Drain the batch if a trigger is satisfied
    pub fn flush_if_triggered(&mut self) -> Option<(Vec<Token>, FiredTrigger)> {
        let trigger = self.batch.which_triggered()?;
        Some((self.batch.take(), trigger))
    }

    /// Drain unconditionally at end-of-run
    pub fn flush_remaining(&mut self) -> Option<(Vec<Token>, FiredTrigger)> {
        if self.batch.is_empty() {
            return None;
        }
        Some((self.batch.take(), FiredTrigger::EndOfRun))
    }

    pub fn batch(&self) -> &AggregationBatch {
        &self.batch
    }

    pub fn batch_mut(&mut self) -> &mut AggregationBatch {
        &mut self.batch
    }
}

/// Merges sibling tokens whose join contract is satisfied
pub struct CoalesceExecutor;

impl CoalesceExecutor {
    pub async fn join(
        manager: &mut TokenManager,
        members: &[Token],
        ctx: &PluginContext,
        auditor: &Auditor,
    ) -> Result<Token> {
        let group = members
            .first()
            .and_then(|t| t.group())
            .unwrap_or_default()
            .to_string();
        let member_ids: Vec<String> = members.iter().map(|t| t.token_id.clone()).collect();

        let merged = manager.join(members, &ctx.node_id)?;

        auditor
            .emit(AuditEvent::TokensJoined {
                run_id: ctx.run_id.clone(),
                group,
                member_token_ids: member_ids,
                join_group: merged.join_group.clone().unwrap_or_default(),
                merged_token_id: merged.token_id.clone(),
            })
            .await?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::clock::{ManualClock, SystemClock};
    use crate::error::PipelineError;
    use crate::trigger::TriggerConfig;
    use async_trait::async_trait;
    use serde_json::json;

    fn test_ctx(node_id: &str) -> PluginContext {
        PluginContext::new(
            "run-1",
            node_id.to_string(),
            json!({}),
            Arc::new(SystemClock::new()),
        )
    }

    fn test_auditor() -> (Arc<MemoryAuditSink>, Auditor) {
        let sink = Arc::new(MemoryAuditSink::new());
        let auditor = Auditor::new(sink.clone(), Arc::new(SystemClock::new()));
        (sink, auditor)
    }

    struct Upcase;

    #[async_trait]
    impl TransformPlugin for Upcase {
        async fn process(&self, row: &Value, _ctx: &PluginContext) -> Result<ProcessOutcome> {
            let name = row["name"].as_str().unwrap_or_default().to_uppercase();
            Ok(ProcessOutcome::Success(json!({"name": name})))
        }
    }

    #[tokio::test]
    async fn test_transform_executor_updates_payload_and_audits() {
        let executor = TransformExecutor::new(Arc::new(Upcase));
        let (sink, auditor) = test_auditor();
        let mut manager = TokenManager::new();
        let token = manager.mint("row-1".to_string(), json!({"name": "ada"}));

        let action = executor
            .execute(&token, &test_ctx("transform-abc"), &auditor)
            .await
            .unwrap();

        match action {
            ExecutorAction::Continue(updated) => {
                assert_eq!(updated.data, json!({"name": "ADA"}));
                assert_eq!(updated.token_id, token.token_id);
                assert_eq!(updated.row_id, token.row_id);
            }
            other => panic!("unexpected action: {other:?}"),
        }

        let events = sink.events();
        assert!(matches!(events[0], AuditEvent::NodeEntered { .. }));
        assert!(
            matches!(&events[1], AuditEvent::NodeExited { outcome, .. } if outcome == "continue")
        );
    }

    struct AlwaysPending;

    #[async_trait]
    impl GatePlugin for AlwaysPending {
        async fn process(&self, _row: &Value, _ctx: &PluginContext) -> Result<ProcessOutcome> {
            Ok(ProcessOutcome::Pending {
                resume_state: json!({"handle": 7}),
            })
        }
    }

    #[tokio::test]
    async fn test_pending_outcome_becomes_suspend() {
        let executor = GateExecutor::new(Arc::new(AlwaysPending));
        let (_sink, auditor) = test_auditor();
        let mut manager = TokenManager::new();
        let token = manager.mint("row-1".to_string(), json!({}));

        let action = executor
            .execute(&token, &test_ctx("gate-abc"), &auditor)
            .await
            .unwrap();
        assert!(matches!(
            action,
            ExecutorAction::Suspend { resume_state, .. } if resume_state == json!({"handle": 7})
        ));
    }

    #[tokio::test]
    async fn test_aggregation_executor_accept_and_flush() {
        let clock = Arc::new(ManualClock::new());
        let mut executor = AggregationExecutor::new(AggregationBatch::new(
            TriggerConfig::new().with_count(2),
            clock,
        ));
        let (sink, auditor) = test_auditor();
        let mut manager = TokenManager::new();
        let ctx = test_ctx("aggregation-abc");

        let t1 = manager.mint("row-1".to_string(), json!({"v": 1}));
        let t2 = manager.mint("row-2".to_string(), json!({"v": 2}));
        executor.accept(t1, &ctx, &auditor).await.unwrap();
        assert!(executor.flush_if_triggered().is_none());

        executor.accept(t2, &ctx, &auditor).await.unwrap();
        let (flushed, trigger) = executor.flush_if_triggered().unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(trigger, FiredTrigger::Count);
        assert_eq!(
            sink.events_where(|e| matches!(e, AuditEvent::BatchAccepted { .. }))
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_coalesce_executor_joins_and_audits() {
        let mut manager = TokenManager::new();
        let (sink, auditor) = test_auditor();
        let parent = manager.mint("row-1".to_string(), json!({"v": 1}));
        let children = manager
            .fork(&parent, &["left".to_string(), "right".to_string()])
            .unwrap();

        let merged = CoalesceExecutor::join(
            &mut manager,
            &children,
            &test_ctx("coalesce-abc"),
            &auditor,
        )
        .await
        .unwrap();

        assert!(merged.join_group.is_some());
        let joins = sink.events_where(|e| matches!(e, AuditEvent::TokensJoined { .. }));
        assert_eq!(joins.len(), 1);
    }

    #[tokio::test]
    async fn test_coalesce_short_join_is_integrity_error() {
        let mut manager = TokenManager::new();
        let (_sink, auditor) = test_auditor();
        let parent = manager.mint("row-1".to_string(), json!({}));
        let children = manager
            .fork(&parent, &["left".to_string(), "right".to_string()])
            .unwrap();

        let err = CoalesceExecutor::join(
            &mut manager,
            &children[..1],
            &test_ctx("coalesce-abc"),
            &auditor,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Integrity(_)));
    }
}
