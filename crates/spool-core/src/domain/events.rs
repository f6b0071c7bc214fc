//! Lifecycle events published by the queue.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::TaskId;

/// Event emitted on every observable task transition, plus operational
/// faults that are not tied to a single task attempt.
///
/// For a given task, `Added` is always published before any `Completed`,
/// `Retried` or `Failed` event for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Added {
        id: TaskId,
        payload: Value,
    },
    Completed {
        id: TaskId,
        result: Value,
        payload: Value,
    },
    Retried {
        id: TaskId,
        payload: Value,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        delay: Duration,
        error: String,
    },
    /// Retry budget exhausted; the task will not run again.
    Failed {
        id: TaskId,
        payload: Value,
        error: String,
        retry_count: u32,
    },
    Error {
        error: String,
        operation: Operation,
    },
}

impl QueueEvent {
    /// Task the event belongs to, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            QueueEvent::Added { id, .. }
            | QueueEvent::Completed { id, .. }
            | QueueEvent::Retried { id, .. }
            | QueueEvent::Failed { id, .. } => Some(*id),
            QueueEvent::Error { .. } => None,
        }
    }
}

/// Queue operation during which an operational fault happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Dispatch,
    UpdateStatus,
    ScheduleWake,
    Stats,
    GetTask,
    Cleanup,
    Remove,
    Close,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Add => "add",
            Operation::Dispatch => "dispatch",
            Operation::UpdateStatus => "update_status",
            Operation::ScheduleWake => "schedule_wake",
            Operation::Stats => "stats",
            Operation::GetTask => "get_task",
            Operation::Cleanup => "cleanup",
            Operation::Remove => "remove",
            Operation::Close => "close",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_id_is_exposed_for_task_events_only() {
        let added = QueueEvent::Added {
            id: TaskId::new(3),
            payload: json!({"n": 1}),
        };
        assert_eq!(added.task_id(), Some(TaskId::new(3)));

        let fault = QueueEvent::Error {
            error: "disk full".into(),
            operation: Operation::Add,
        };
        assert_eq!(fault.task_id(), None);
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let event = QueueEvent::Failed {
            id: TaskId::new(9),
            payload: json!(null),
            error: "boom".into(),
            retry_count: 4,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "failed");
        assert_eq!(value["id"], 9);
        assert_eq!(value["retry_count"], 4);
    }
}
