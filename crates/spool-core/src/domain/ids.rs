//! Domain identifiers.
//!
//! Task ids are assigned by the store (auto-increment), so they are plain
//! integers wrapped in a newtype to keep them from mixing with counts or
//! retry numbers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task row.
///
/// Ids are unique, increase monotonically in insertion order and never
/// change once assigned.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw row id as stored.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix() {
        assert_eq!(TaskId::new(42).to_string(), "task-42");
    }

    #[test]
    fn ids_order_by_value() {
        assert!(TaskId::new(1) < TaskId::new(2));
        assert_eq!(TaskId::from(7).get(), 7);
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&TaskId::new(5)).unwrap();
        assert_eq!(json, "5");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskId::new(5));
    }
}
