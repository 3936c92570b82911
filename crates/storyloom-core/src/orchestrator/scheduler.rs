//! Loop scheduler with configurable interval and randomized jitter.
//!
//! The sweeper paces itself with a `LoopScheduler`; the jitter keeps a
//! fleet of processes from hammering the store in lockstep after a
//! simultaneous restart.

use rand::Rng;
use std::time::Duration;

/// A scheduler that paces background loop iterations with jitter.
///
/// Each call to [`tick()`](LoopScheduler::tick) sleeps for `interval + random_jitter`,
/// where `random_jitter` is drawn uniformly from `[min_delay, max_delay]`.
#[derive(Debug, Clone)]
pub struct LoopScheduler {
    interval: Duration,
    min_delay: Duration,
    max_delay: Duration,
}

impl LoopScheduler {
    /// Create a new scheduler.
    ///
    /// If `min_delay > max_delay`, the values are swapped to prevent panics.
    pub fn new(interval: Duration, min_delay: Duration, max_delay: Duration) -> Self {
        let (actual_min, actual_max) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            tracing::warn!(
                min_ms = min_delay.as_millis() as u64,
                max_ms = max_delay.as_millis() as u64,
                "min_delay > max_delay, swapping values"
            );
            (max_delay, min_delay)
        };

        Self {
            interval,
            min_delay: actual_min,
            max_delay: actual_max,
        }
    }

    /// Compute the next sleep duration: `interval + random_jitter`.
    pub fn next_delay(&self) -> Duration {
        let jitter = if self.min_delay == self.max_delay {
            self.min_delay
        } else {
            let min_ms = self.min_delay.as_millis() as u64;
            let max_ms = self.max_delay.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
        };

        self.interval + jitter
    }

    /// Sleep for the next computed delay (interval + jitter).
    pub async fn tick(&self) {
        let delay = self.next_delay();
        tracing::debug!(
            delay_ms = delay.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "scheduler tick sleeping"
        );
        tokio::time::sleep(delay).await;
    }

    /// Return the base interval (without jitter).
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Return the jitter range as `(min_delay, max_delay)`.
    pub fn jitter_range(&self) -> (Duration, Duration) {
        (self.min_delay, self.max_delay)
    }
}
