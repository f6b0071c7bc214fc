//! Task status: the persisted lifecycle state of a task row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending | Failed (retry due) -> Processing -> Failed (retry scheduled)
/// - Processing -> Failed (retry budget exhausted, terminal)
///
/// `Failed` covers both the retryable and the terminal case; the two are told
/// apart by whether the row still carries a `next_retry_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for its first attempt.
    Pending,

    /// Currently being executed by the dispatcher.
    Processing,

    /// Handler succeeded.
    Completed,

    /// Last attempt failed.
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// Text stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_round_trips_for_every_status() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_text_is_rejected() {
        let err = "running".parse::<TaskStatus>().unwrap_err();
        assert!(err.to_string().contains("running"));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Processing).unwrap(),
            "\"processing\""
        );
    }
}
