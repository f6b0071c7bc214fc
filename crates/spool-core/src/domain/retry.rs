//! Retry policy: decides whether a failed task is retried and after how long.

use std::time::Duration;

use rand::Rng;

/// Outcome of applying the retry policy to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run again after `delay`.
    Retry { retry_count: u32, delay: Duration },

    /// Retry budget exhausted; the task fails terminally.
    Exhausted { retry_count: u32 },
}

impl RetryDecision {
    /// Retry count to persist with the failure.
    pub fn retry_count(&self) -> u32 {
        match *self {
            RetryDecision::Retry { retry_count, .. } | RetryDecision::Exhausted { retry_count } => {
                retry_count
            }
        }
    }
}

/// Exponential backoff with optional multiplicative jitter.
///
/// The k-th retry (k >= 1) waits `base_delay * 2^(k-1)`, scaled by a factor
/// drawn uniformly from `[0.5, 1.0]` when jitter is enabled. A task gets at
/// most `max_retries` retries; the failure after that is terminal.
///
/// Example with base_delay=1s, jitter off:
/// - retry 1: 1s
/// - retry 2: 2s
/// - retry 3: 4s
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_retries: u32, jitter: bool) -> Self {
        Self {
            base_delay,
            max_retries,
            jitter,
        }
    }

    /// Un-jittered delay before retry number `retry_count` (1-indexed).
    ///
    /// Saturates at `u64::MAX` milliseconds instead of overflowing.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let scaled_ms = 1u64
            .checked_shl(exponent)
            .and_then(|factor| base_ms.checked_mul(factor))
            .unwrap_or(u64::MAX);
        Duration::from_millis(scaled_ms)
    }

    /// Decide what happens after a failed attempt of a task that had
    /// `retry_count` failures before it.
    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        self.decide_with(retry_count, &mut rand::thread_rng())
    }

    /// Same as [`RetryPolicy::decide`] with an explicit jitter source.
    pub fn decide_with<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> RetryDecision {
        let next = retry_count.saturating_add(1);
        if next > self.max_retries {
            return RetryDecision::Exhausted { retry_count: next };
        }

        let base = self.backoff(next);
        let delay = if self.jitter {
            let factor: f64 = rng.gen_range(0.5..=1.0);
            // `as` saturates for out-of-range floats.
            Duration::from_millis((base.as_millis() as f64 * factor).floor() as u64)
        } else {
            base
        };

        RetryDecision::Retry {
            retry_count: next,
            delay,
        }
    }
}
