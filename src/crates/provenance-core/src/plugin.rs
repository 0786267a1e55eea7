//! Plugin protocol: the call shapes the engine consumes
//!
//! The engine never depends on concrete plugin types. Each node names a
//! plugin, and the [`PluginRegistry`] (an explicit object constructed once
//! at startup, no ambient globals) maps those names to trait-object
//! instances for the four capability seams:
//!
//! - [`SourcePlugin`]: lazily streams rows (or quarantine markers) into a run
//! - [`TransformPlugin`] / [`GatePlugin`]: process one row and return a
//!   tagged [`ProcessOutcome`]
//! - [`SinkPlugin`]: receives released rows; `flush` and `close` idempotent
//!
//! "Batch submitted but not yet complete" is an ordinary outcome variant,
//! [`ProcessOutcome::Pending`], never an error: it carries opaque resume
//! state, the engine suspends the token, and the next invocation sees that
//! state in its [`PluginContext`] so already-submitted work is not redone.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{PipelineError, Result};
use crate::graph::NodeId;

/// Per-invocation context handed to every plugin call
#[derive(Clone)]
pub struct PluginContext {
    pub run_id: String,
    pub node_id: NodeId,
    /// Node configuration from the graph declaration
    pub config: Value,
    pub clock: Arc<dyn Clock>,
    /// State a previous `Pending` outcome asked the engine to hold
    pub resume_state: Option<Value>,
}

impl PluginContext {
    pub fn new(run_id: impl Into<String>, node_id: NodeId, config: Value, clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id: run_id.into(),
            node_id,
            config,
            clock,
            resume_state: None,
        }
    }

    pub fn with_resume_state(mut self, state: Value) -> Self {
        self.resume_state = Some(state);
        self
    }
}

/// Tagged result of one transform or gate invocation
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Row processed; continue along the default edge with this payload
    Success(Value),
    /// Continue along the default edge with the row unchanged
    Continue,
    /// Route the (possibly updated) row along a named edge
    Route { label: String, data: Value },
    /// Copy the row down each named path
    ForkToPaths { branches: Vec<String>, data: Value },
    /// One row logically produced N independent downstream rows
    Expand { rows: Vec<Value> },
    /// Work submitted externally but not finished; suspend and check later
    Pending { resume_state: Value },
    /// Plugin-classified failure; `retryable` selects the retry path
    Failed { reason: String, retryable: bool },
}

/// One record out of a source: a usable row or a quarantined raw record
#[derive(Debug, Clone)]
pub enum SourceRecord {
    Row(Value),
    Quarantine { raw: Value, reason: String },
}

#[async_trait]
pub trait SourcePlugin: Send + Sync {
    /// Open the source and return a lazy stream of records
    async fn load(&self, ctx: &PluginContext) -> Result<BoxStream<'static, SourceRecord>>;

    /// Idempotent
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait TransformPlugin: Send + Sync {
    async fn process(&self, row: &Value, ctx: &PluginContext) -> Result<ProcessOutcome>;
}

#[async_trait]
pub trait GatePlugin: Send + Sync {
    async fn process(&self, row: &Value, ctx: &PluginContext) -> Result<ProcessOutcome>;
}

#[async_trait]
pub trait SinkPlugin: Send + Sync {
    async fn write(&self, rows: &[Value], ctx: &PluginContext) -> Result<()>;

    /// Idempotent
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Idempotent
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Name → plugin instance mapping for every capability seam
#[derive(Default)]
pub struct PluginRegistry {
    sources: HashMap<String, Arc<dyn SourcePlugin>>,
    transforms: HashMap<String, Arc<dyn TransformPlugin>>,
    gates: HashMap<String, Arc<dyn GatePlugin>>,
    sinks: HashMap<String, Arc<dyn SinkPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, name: impl Into<String>, plugin: Arc<dyn SourcePlugin>) {
        self.sources.insert(name.into(), plugin);
    }

    pub fn register_transform(&mut self, name: impl Into<String>, plugin: Arc<dyn TransformPlugin>) {
        self.transforms.insert(name.into(), plugin);
    }

    pub fn register_gate(&mut self, name: impl Into<String>, plugin: Arc<dyn GatePlugin>) {
        self.gates.insert(name.into(), plugin);
    }

    pub fn register_sink(&mut self, name: impl Into<String>, plugin: Arc<dyn SinkPlugin>) {
        self.sinks.insert(name.into(), plugin);
    }

    pub fn source(&self, name: &str) -> Result<Arc<dyn SourcePlugin>> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| missing_plugin("source", name))
    }

    pub fn transform(&self, name: &str) -> Result<Arc<dyn TransformPlugin>> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| missing_plugin("transform", name))
    }

    pub fn gate(&self, name: &str) -> Result<Arc<dyn GatePlugin>> {
        self.gates
            .get(name)
            .cloned()
            .ok_or_else(|| missing_plugin("gate", name))
    }

    pub fn sink(&self, name: &str) -> Result<Arc<dyn SinkPlugin>> {
        self.sinks
            .get(name)
            .cloned()
            .ok_or_else(|| missing_plugin("sink", name))
    }
}

fn missing_plugin(kind: &str, name: &str) -> PipelineError {
    PipelineError::Configuration(format!("no {kind} plugin registered under '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use serde_json::json;

    struct Passthrough;

    #[async_trait]
    impl TransformPlugin for Passthrough {
        async fn process(&self, row: &Value, _ctx: &PluginContext) -> Result<ProcessOutcome> {
            Ok(ProcessOutcome::Success(row.clone()))
        }
    }

    #[tokio::test]
    async fn test_registry_resolves_registered_plugin() {
        let mut registry = PluginRegistry::new();
        registry.register_transform("passthrough", Arc::new(Passthrough));

        let plugin = registry.transform("passthrough").unwrap();
        let ctx = PluginContext::new(
            "run-1",
            "transform-abc".to_string(),
            json!({}),
            Arc::new(SystemClock::new()),
        );
        let outcome = plugin.process(&json!({"a": 1}), &ctx).await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Success(v) if v == json!({"a": 1})));
    }

    #[test]
    fn test_missing_plugin_is_configuration_error() {
        let registry = PluginRegistry::new();
        let err = match registry.transform("absent") {
            Err(err) => err,
            Ok(_) => panic!("lookup of an unregistered plugin should fail"),
        };
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("absent"));
    }

    #[test]
    fn test_context_carries_resume_state() {
        let ctx = PluginContext::new(
            "run-1",
            "transform-abc".to_string(),
            json!({}),
            Arc::new(SystemClock::new()),
        )
        .with_resume_state(json!({"batch_handle": "xyz"}));
        assert_eq!(ctx.resume_state, Some(json!({"batch_handle": "xyz"})));
    }
}
