//! Queue configuration.
//!
//! All durations are plain milliseconds so the struct can be read from any
//! serde format without custom duration parsing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::error::QueueError;

/// Settings for one queue instance.
///
/// ## Field semantics
/// - `max_concurrent`: handler invocations allowed in flight at once (>= 1)
/// - `max_retries`: retries after the first failure; the next failure is terminal
/// - `base_retry_delay_ms`: delay before the first retry, doubled per retry
/// - `jitter`: scale each delay by a random factor in `[0.5, 1.0]`
/// - `polling_interval_ms`: lower bound for any wake timer (>= 1)
/// - `auto_process`: request a dispatch cycle on `add` once a handler runs
/// - `event_capacity`: ring buffer size of the event channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub jitter: bool,
    pub polling_interval_ms: u64,
    pub auto_process: bool,
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            jitter: true,
            polling_interval_ms: 1_000,
            auto_process: true,
            event_capacity: 1_024,
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_retry_delay_ms),
            self.max_retries,
            self.jitter,
        )
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_concurrent == 0 {
            return Err(QueueError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.polling_interval_ms == 0 {
            return Err(QueueError::Config(
                "polling_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
