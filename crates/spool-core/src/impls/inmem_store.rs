//! InMemoryTaskStore - non-durable `TaskStore` for tests and embedding.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{StatusCount, Task, TaskId, TaskStatus};
use crate::ports::{StoreError, TaskStore};

struct StoreState {
    tasks: BTreeMap<TaskId, Task>,

    /// Next id to assign.
    next_id: i64,

    closed: bool,
}

impl StoreState {
    fn open(&mut self) -> Result<&mut Self, StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(self)
    }
}

/// `TaskStore` backed by a map behind an async mutex.
///
/// Same semantics as the SQLite store, minus durability.
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                tasks: BTreeMap::new(),
                next_id: 1,
                closed: false,
            }),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, payload: &str, now: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        let id = TaskId::new(state.next_id);
        state.next_id += 1;
        state.tasks.insert(id, Task::new(id, payload, now));
        Ok(id)
    }

    async fn select_ready(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        let mut ready: Vec<&Task> = state
            .tasks
            .values()
            .filter(|task| task.is_ready(now))
            .collect();
        ready.sort_by_key(|task| (task.created_at, task.id));
        Ok(ready.into_iter().take(limit).cloned().collect())
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        retry_count: u32,
        next_retry_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        if let Some(task) = state.tasks.get_mut(&id) {
            task.status = status;
            task.retry_count = retry_count;
            task.next_retry_at = next_retry_at;
            task.updated_at = now;
        }
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn counts_by_status(&self) -> Result<Vec<StatusCount>, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        let mut counts: BTreeMap<&'static str, StatusCount> = BTreeMap::new();
        for task in state.tasks.values() {
            counts
                .entry(task.status.as_str())
                .or_insert(StatusCount {
                    status: task.status,
                    count: 0,
                })
                .count += 1;
        }
        Ok(counts.into_values().collect())
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        let before = state.tasks.len();
        state
            .tasks
            .retain(|_, task| !(task.status == TaskStatus::Completed && task.updated_at < cutoff));
        Ok((before - state.tasks.len()) as u64)
    }

    async fn delete(&self, id: TaskId) -> Result<bool, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        Ok(state.tasks.remove(&id).is_some())
    }

    async fn earliest_retry_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut guard = self.state.lock().await;
        let state = guard.open()?;
        Ok(state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Failed)
            .filter_map(|task| task.next_retry_at)
            .min())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::task_store::conformance;

    #[tokio::test]
    async fn ids_increase() {
        conformance::ids_increase(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn ready_selection_is_fifo_and_bounded() {
        conformance::ready_selection_is_fifo_and_bounded(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn finished_and_waiting_tasks_are_not_ready() {
        conformance::finished_and_waiting_tasks_are_not_ready(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn update_is_visible_through_get() {
        conformance::update_is_visible_through_get(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn counts_group_by_status() {
        conformance::counts_group_by_status(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_completed() {
        conformance::cleanup_removes_only_old_completed(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn delete_reports_whether_a_row_went_away() {
        conformance::delete_reports_whether_a_row_went_away(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn earliest_retry_ignores_terminal_rows() {
        conformance::earliest_retry_ignores_terminal_rows(&InMemoryTaskStore::new()).await;
    }

    #[tokio::test]
    async fn closed_store_rejects_calls() {
        let store = InMemoryTaskStore::new();
        store.insert("{}", conformance::t(0)).await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(
            store.insert("{}", conformance::t(1)).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.select_ready(1, conformance::t(1)).await,
            Err(StoreError::Closed)
        ));
        // Closing twice is fine.
        store.close().await.unwrap();
    }
}
