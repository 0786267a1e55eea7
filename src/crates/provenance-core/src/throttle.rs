//! AIMD throttle for capacity-limited external services
//!
//! One [`AimdThrottle`] is shared per service name. Every failure signal
//! (rate limit, overload) raises the pacing delay additively; every success
//! decays it multiplicatively back toward zero. Callers `acquire()` before
//! issuing a call and sleep out the current delay, so submission blocks
//! rather than busy-spins.
//!
//! The delay lives in a single `AtomicU64` of milliseconds, adjusted with
//! compare-and-swap loops so concurrent workers reporting signals never lose
//! an update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Shared additive-increase/multiplicative-decrease pacing delay
#[derive(Debug)]
pub struct AimdThrottle {
    /// Current pacing delay in milliseconds
    delay_ms: AtomicU64,
    /// Added to the delay on every failure signal
    increment_ms: u64,
    /// Delay is divided by this on every success signal
    decay_factor: u64,
    /// Ceiling the delay never exceeds
    max_delay_ms: u64,
}

impl AimdThrottle {
    /// Throttle with a 100ms failure increment, halving decay, 30s ceiling
    pub fn new() -> Self {
        Self::with_params(100, 2, 30_000)
    }

    pub fn with_params(increment_ms: u64, decay_factor: u64, max_delay_ms: u64) -> Self {
        Self {
            delay_ms: AtomicU64::new(0),
            increment_ms,
            decay_factor: decay_factor.max(2),
            max_delay_ms,
        }
    }

    /// Wait out the current pacing delay before issuing a call
    pub async fn acquire(&self) {
        let delay = self.delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
    }

    /// Service answered normally: decay the delay multiplicatively. Once the
    /// decayed value drops below one failure increment the throttle snaps
    /// fully open instead of trailing off in ever-smaller residues.
    pub fn on_success(&self) {
        let _ = self
            .delay_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let decayed = current / self.decay_factor;
                Some(if decayed < self.increment_ms { 0 } else { decayed })
            });
    }

    /// Service signalled overload: raise the delay additively, capped
    pub fn on_failure(&self) {
        let _ = self
            .delay_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + self.increment_ms).min(self.max_delay_ms))
            });
    }

    /// Current pacing delay
    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Acquire))
    }
}

impl Default for AimdThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unthrottled() {
        let throttle = AimdThrottle::new();
        assert_eq!(throttle.current_delay(), Duration::ZERO);
    }

    #[test]
    fn test_failures_raise_delay_additively() {
        let throttle = AimdThrottle::with_params(100, 2, 30_000);
        throttle.on_failure();
        throttle.on_failure();
        throttle.on_failure();
        assert_eq!(throttle.current_delay(), Duration::from_millis(300));
    }

    #[test]
    fn test_success_decays_delay_multiplicatively() {
        let throttle = AimdThrottle::with_params(100, 2, 30_000);
        for _ in 0..4 {
            throttle.on_failure();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(400));

        throttle.on_success();
        assert_eq!(throttle.current_delay(), Duration::from_millis(200));
        throttle.on_success();
        assert_eq!(throttle.current_delay(), Duration::from_millis(100));
        throttle.on_success();
        throttle.on_success();
        throttle.on_success();
        throttle.on_success();
        assert_eq!(throttle.current_delay(), Duration::ZERO);
    }

    #[test]
    fn test_decay_snaps_open_below_one_increment() {
        let throttle = AimdThrottle::with_params(100, 2, 30_000);
        throttle.on_failure();
        assert_eq!(throttle.current_delay(), Duration::from_millis(100));
        // 100 / 2 = 50 is below one increment, so the delay clears entirely
        throttle.on_success();
        assert_eq!(throttle.current_delay(), Duration::ZERO);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let throttle = AimdThrottle::with_params(1_000, 2, 2_500);
        for _ in 0..10 {
            throttle.on_failure();
        }
        assert_eq!(throttle.current_delay(), Duration::from_millis(2_500));
    }

    #[tokio::test]
    async fn test_acquire_returns_immediately_when_unthrottled() {
        let throttle = AimdThrottle::new();
        // Must not hang
        tokio::time::timeout(Duration::from_millis(50), throttle.acquire())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_sleeps_out_current_delay() {
        let throttle = AimdThrottle::with_params(500, 2, 30_000);
        throttle.on_failure();

        let start = tokio::time::Instant::now();
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
