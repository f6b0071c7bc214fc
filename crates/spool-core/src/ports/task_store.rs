//! TaskStore port - the durable table of tasks.
//!
//! The dispatcher is the only writer of task rows. Every write is atomic per
//! row; the queue never needs a cross-row transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{StatusCount, Task, TaskId, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt task row: {0}")]
    Corrupt(String),

    #[error("task store is closed")]
    Closed,
}

/// Persistence contract the dispatcher relies on.
///
/// Implementations must keep ready selection consistent with
/// [`Task::is_ready`]: `status = pending OR (status = failed AND
/// next_retry_at <= now)`, oldest `created_at` first, ties broken by id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a pending row and return its new, strictly increasing id.
    async fn insert(&self, payload: &str, now: DateTime<Utc>) -> Result<TaskId, StoreError>;

    /// Up to `limit` ready rows in FIFO order.
    async fn select_ready(&self, limit: usize, now: DateTime<Utc>)
    -> Result<Vec<Task>, StoreError>;

    /// Overwrite the lifecycle columns of one row and stamp `updated_at`.
    /// Updating a row that no longer exists is not an error.
    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Row counts per status, ordered by status text; statuses with no rows
    /// are omitted.
    async fn counts_by_status(&self) -> Result<Vec<StatusCount>, StoreError>;

    /// Delete completed rows last updated before `cutoff`.
    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Soonest `next_retry_at` among failed rows that still have one.
    async fn earliest_retry_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Release the underlying storage handle. Further calls may fail.
    async fn close(&self) -> Result<(), StoreError>;
}
