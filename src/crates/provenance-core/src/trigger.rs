//! Aggregation batch triggers: count, age timeout, batch-level condition
//!
//! Each aggregation node buffers accepted tokens into an [`AggregationBatch`]
//! and asks its [`TriggerEvaluator`] after every accept (and on the
//! orchestrator's periodic timeout sweep) whether the batch should flush. The three triggers are
//! a pure OR: count reached, batch age past the timeout, or a data-dependent
//! condition over the whole batch. For the audit record,
//! [`TriggerEvaluator::which_triggered`] reports the first satisfied trigger
//! in a fixed priority order (count, timeout, condition) so the same batch
//! state always names the same cause.
//!
//! The evaluator takes its time from the injected [`Clock`], so timeout
//! behavior is testable with [`ManualClock`](crate::clock::ManualClock).

use crate::clock::Clock;
use crate::token::Token;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Batch-level predicate evaluated over all buffered tokens
pub type BatchCondition = Arc<dyn Fn(&[Token]) -> bool + Send + Sync>;

/// Which triggers are armed for one aggregation node
#[derive(Clone, Default)]
pub struct TriggerConfig {
    /// Flush once this many tokens have been accepted
    pub count: Option<usize>,
    /// Flush once the batch has aged this long since its first accept
    pub timeout: Option<Duration>,
    /// Flush once this predicate holds over the buffered batch
    pub condition: Option<BatchCondition>,
}

impl TriggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&[Token]) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// A batch with no armed trigger only flushes at end-of-run
    pub fn is_unarmed(&self) -> bool {
        self.count.is_none() && self.timeout.is_none() && self.condition.is_none()
    }
}

impl fmt::Debug for TriggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerConfig")
            .field("count", &self.count)
            .field("timeout", &self.timeout)
            .field("condition", &self.condition.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Cause of a batch flush, recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiredTrigger {
    Count,
    Timeout,
    Condition,
    /// Remaining batches are flushed unconditionally when the run ends
    EndOfRun,
}

impl fmt::Display for FiredTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FiredTrigger::Count => write!(f, "count"),
            FiredTrigger::Timeout => write!(f, "timeout"),
            FiredTrigger::Condition => write!(f, "condition"),
            FiredTrigger::EndOfRun => write!(f, "end_of_run"),
        }
    }
}

/// Decides when one aggregation node's buffered batch should flush
pub struct TriggerEvaluator {
    config: TriggerConfig,
    clock: Arc<dyn Clock>,
    count: usize,
    first_accept_ms: Option<u64>,
}

impl TriggerEvaluator {
    pub fn new(config: TriggerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            count: 0,
            first_accept_ms: None,
        }
    }

    /// Record one accepted token; the age timer starts on the first call
    pub fn record_accept(&mut self) {
        if self.first_accept_ms.is_none() {
            self.first_accept_ms = Some(self.clock.monotonic_ms());
        }
        self.count += 1;
    }

    /// Age of the batch since its first accept
    pub fn age(&self) -> Duration {
        match self.first_accept_ms {
            Some(first) => Duration::from_millis(self.clock.monotonic_ms().saturating_sub(first)),
            None => Duration::ZERO,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn count_satisfied(&self) -> bool {
        matches!(self.config.count, Some(threshold) if self.count >= threshold)
    }

    fn timeout_satisfied(&self) -> bool {
        match self.config.timeout {
            Some(timeout) => self.first_accept_ms.is_some() && self.age() >= timeout,
            None => false,
        }
    }

    fn condition_satisfied(&self, batch: &[Token]) -> bool {
        match &self.config.condition {
            Some(condition) => !batch.is_empty() && condition(batch),
            None => false,
        }
    }

    /// OR across all armed triggers
    pub fn should_trigger(&self, batch: &[Token]) -> bool {
        self.count_satisfied() || self.timeout_satisfied() || self.condition_satisfied(batch)
    }

    /// First individually-satisfied trigger in priority order
    pub fn which_triggered(&self, batch: &[Token]) -> Option<FiredTrigger> {
        if self.count_satisfied() {
            Some(FiredTrigger::Count)
        } else if self.timeout_satisfied() {
            Some(FiredTrigger::Timeout)
        } else if self.condition_satisfied(batch) {
            Some(FiredTrigger::Condition)
        } else {
            None
        }
    }

    /// Clear all state after a flush
    pub fn reset(&mut self) {
        self.count = 0;
        self.first_accept_ms = None;
    }

    /// Monotonic timestamp of the first accept, for checkpoint snapshots
    pub fn first_accept_ms(&self) -> Option<u64> {
        self.first_accept_ms
    }

    /// Restore timing state from a checkpoint snapshot
    pub fn restore(&mut self, count: usize, first_accept_ms: Option<u64>) {
        self.count = count;
        self.first_accept_ms = first_accept_ms;
    }
}

impl fmt::Debug for TriggerEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerEvaluator")
            .field("config", &self.config)
            .field("count", &self.count)
            .field("first_accept_ms", &self.first_accept_ms)
            .finish()
    }
}

/// Buffered tokens awaiting a trigger at one aggregation node
pub struct AggregationBatch {
    tokens: Vec<Token>,
    evaluator: TriggerEvaluator,
}

impl AggregationBatch {
    pub fn new(config: TriggerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Vec::new(),
            evaluator: TriggerEvaluator::new(config, clock),
        }
    }

    /// Buffer one token and update the trigger state
    pub fn accept(&mut self, token: Token) {
        self.evaluator.record_accept();
        self.tokens.push(token);
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn should_flush(&self) -> bool {
        self.evaluator.should_trigger(&self.tokens)
    }

    pub fn which_triggered(&self) -> Option<FiredTrigger> {
        self.evaluator.which_triggered(&self.tokens)
    }

    /// Drain the buffered tokens and reset the trigger state
    pub fn take(&mut self) -> Vec<Token> {
        self.evaluator.reset();
        std::mem::take(&mut self.tokens)
    }

    pub fn evaluator(&self) -> &TriggerEvaluator {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut TriggerEvaluator {
        &mut self.evaluator
    }
}
