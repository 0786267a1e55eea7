//! Clock abstraction for timeout evaluation
//!
//! A single [`Clock`] instance is injected everywhere the engine evaluates
//! time: aggregation age triggers, checkpoint timestamps, retry bookkeeping.
//! That makes timeout behavior testable: swap [`SystemClock`] for
//! [`ManualClock`] and advance it explicitly.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Time source shared across the engine
///
/// `now()` is wall-clock time for audit and checkpoint timestamps;
/// `monotonic_ms()` is a monotonic reading (milliseconds since clock
/// construction) used for elapsed-time comparisons, immune to wall-clock
/// adjustments.
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds elapsed since this clock was created, monotonic
    fn monotonic_ms(&self) -> u64;
}

/// Real time, backed by `chrono` and `std::time::Instant`
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Controllable clock for deterministic tests
///
/// Starts at a fixed wall time with zero monotonic elapsed; both advance only
/// through [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, u64)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new((Utc::now(), 0)),
        }
    }

    /// Move both wall and monotonic time forward
    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock();
        state.0 += chrono::Duration::from_std(delta).unwrap_or(chrono::Duration::zero());
        state.1 += delta.as_millis() as u64;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().0
    }

    fn monotonic_ms(&self) -> u64 {
        self.state.lock().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_starts_at_zero() {
        let clock = ManualClock::new();
        assert_eq!(clock.monotonic_ms(), 0);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new();
        let before = clock.now();

        clock.advance(Duration::from_millis(1500));

        assert_eq!(clock.monotonic_ms(), 1500);
        assert_eq!((clock.now() - before).num_milliseconds(), 1500);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
    }
}
