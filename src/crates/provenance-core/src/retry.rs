//! Retry policy: bounded exponential backoff for transient node failures
//!
//! A retry only happens when the failing plugin marked the error as
//! retryable; validation and integrity failures never come through here.
//! Two independent ceilings bound the loop:
//! - `max_attempts` caps how many tries a single row gets at a node
//! - `max_total_retry` caps the cumulative time a row may spend waiting
//!   between attempts, so a pathological backoff curve cannot stall the
//!   ordered release stream behind it indefinitely
//!
//! Delays follow `initial_interval * backoff_factor ^ attempt`, capped at
//! `max_interval`, with optional jitter (a 0.5x-1.5x random factor) to keep
//! simultaneous failures from retrying in lockstep against the same backend.

use rand::Rng;
use std::time::Duration;

/// Configuration for retrying failed node executions
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Cumulative ceiling on time spent waiting across all retries of one row
    pub max_total_retry: Duration,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            max_total_retry: Duration::from_secs(600),
            jitter: true,
        }
    }

    /// Set the initial interval between retries
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    /// Set the backoff factor
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum interval between retries
    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    /// Set the cumulative backoff ceiling
    pub fn with_max_total_retry(mut self, total: Duration) -> Self {
        self.max_total_retry = total;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed)
    ///
    /// Exponential backoff `initial_interval * backoff_factor ^ attempt`,
    /// capped at `max_interval`, jittered when enabled.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::from_secs(0);
        }

        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            let jitter_factor = rng.gen_range(0.5..=1.5);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Check if more attempts are allowed for the given attempt count
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Per-row tracking of attempts and cumulative backoff
#[derive(Debug, Clone)]
pub struct RetryState {
    /// Number of attempts made so far
    pub attempts: usize,

    /// Total time spent waiting between attempts
    pub total_waited: Duration,

    /// Last error message
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            total_waited: Duration::ZERO,
            last_error: None,
        }
    }

    /// Record a failed attempt
    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    /// Record backoff time about to be spent before the next attempt
    pub fn record_wait(&mut self, delay: Duration) {
        self.total_waited += delay;
    }

    /// Whether another attempt fits under both ceilings of `policy`
    pub fn allows_retry(&self, policy: &RetryPolicy) -> bool {
        policy.should_retry(self.attempts) && self.total_waited < policy.max_total_retry
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.total_waited = Duration::ZERO;
        self.last_error = None;
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_interval, 0.5);
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.max_interval, 128.0);
        assert_eq!(policy.max_total_retry, Duration::from_secs(600));
        assert!(policy.jitter);
    }

    #[test]
    fn test_exponential_backoff_without_jitter() {
        let policy = RetryPolicy::new(5)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_max_interval(100.0)
            .with_jitter(false);

        assert_eq!(policy.calculate_delay(0).as_secs_f64(), 1.0);
        assert_eq!(policy.calculate_delay(1).as_secs_f64(), 2.0);
        assert_eq!(policy.calculate_delay(2).as_secs_f64(), 4.0);
        assert_eq!(policy.calculate_delay(3).as_secs_f64(), 8.0);
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::new(10)
            .with_initial_interval(10.0)
            .with_backoff_factor(2.0)
            .with_max_interval(50.0)
            .with_jitter(false);

        // 10.0 * 2^5 = 320.0, capped at 50.0
        assert_eq!(policy.calculate_delay(5).as_secs_f64(), 50.0);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::new(5)
            .with_initial_interval(1.0)
            .with_backoff_factor(2.0)
            .with_jitter(true);

        let base = 4.0; // 1.0 * 2^2
        for _ in 0..20 {
            let delay = policy.calculate_delay(2).as_secs_f64();
            assert!(delay >= base * 0.5);
            assert!(delay <= base * 1.5);
        }
    }

    #[test]
    fn test_cumulative_ceiling_stops_retries() {
        let policy = RetryPolicy::new(100)
            .with_jitter(false)
            .with_max_total_retry(Duration::from_secs(5));

        let mut state = RetryState::new();
        state.record_attempt(Some("timeout".to_string()));
        state.record_wait(Duration::from_secs(2));
        assert!(state.allows_retry(&policy));

        state.record_attempt(Some("timeout".to_string()));
        state.record_wait(Duration::from_secs(4));
        // 6s waited exceeds the 5s ceiling even though attempts remain
        assert!(!state.allows_retry(&policy));
    }

    #[test]
    fn test_attempt_ceiling_stops_retries() {
        let policy = RetryPolicy::new(2);
        let mut state = RetryState::new();
        assert!(state.allows_retry(&policy));
        state.record_attempt(None);
        assert!(state.allows_retry(&policy));
        state.record_attempt(None);
        assert!(!state.allows_retry(&policy));
    }
}
