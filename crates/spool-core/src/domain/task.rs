use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskStatus};

/// One task row: serialized payload plus lifecycle metadata.
///
/// The payload is kept in its serialized (JSON text) form; decoding happens
/// in the dispatcher right before the handler runs, so a row with a malformed
/// payload still flows through the normal retry lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: String,
    pub status: TaskStatus,

    /// Number of failed attempts so far.
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set only while the task is failed and still has retry budget.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A fresh pending row.
    pub fn new(id: TaskId, payload: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload: payload.into(),
            status: TaskStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            next_retry_at: None,
        }
    }

    /// Eligible for execution at `now`: pending, or failed with an elapsed
    /// retry delay.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Failed => self.next_retry_at.is_some_and(|at| at <= now),
            TaskStatus::Processing | TaskStatus::Completed => false,
        }
    }

    /// Failed with no retry scheduled; never selected again.
    pub fn is_terminal_failure(&self) -> bool {
        self.status == TaskStatus::Failed && self.next_retry_at.is_none()
    }
}

/// Number of tasks in one status, as reported by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: TaskStatus,
    pub count: u64,
}
