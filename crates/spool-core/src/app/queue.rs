//! TaskQueue - the public surface of the queue.
//!
//! Two ways to run tasks:
//! - `process(handler)`: continuous mode; the queue keeps dispatching on
//!   `add`, after each busy cycle and when a retry falls due
//! - `process_once(handler)`: a single dispatch cycle, awaited by the caller

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::builder::QueueBuilder;
use super::config::QueueConfig;
use super::dispatcher::{CycleReport, CycleRequest, Dispatcher};
use super::status::QueueStatus;
use crate::domain::{Operation, QueueEvent, StatusCount, Task, TaskId};
use crate::error::QueueError;
use crate::impls::InMemoryTaskStore;
use crate::ports::{Clock, SystemClock, TaskStore};
use crate::typed::TaskHandler;

/// Persistent task queue with bounded concurrency and retry with backoff.
pub struct TaskQueue {
    dispatcher: Arc<Dispatcher>,
}

impl TaskQueue {
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    pub(crate) fn from_parts(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(store, clock, config)),
        }
    }

    /// Non-durable queue on an [`InMemoryTaskStore`].
    pub fn in_memory(config: QueueConfig) -> Result<Self, QueueError> {
        Self::builder()
            .store(InMemoryTaskStore::new())
            .clock(SystemClock)
            .config(config)
            .build()
    }

    /// Durable queue on a SQLite file, created if missing.
    #[cfg(feature = "sqlite")]
    pub async fn open_sqlite(
        path: impl AsRef<std::path::Path>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        let store = crate::impls::SqliteTaskStore::open(path).await?;
        Self::builder().store(store).config(config).build()
    }

    /// Persist a new pending task and return its id.
    ///
    /// In continuous mode with `auto_process` on, this also requests a
    /// dispatch cycle.
    ///
    /// # Errors
    /// - `QueueError::Closed` after `close()`
    /// - `QueueError::Payload` when `payload` cannot be serialized
    /// - `QueueError::Store` when the insert fails (also published as an
    ///   `error` event)
    pub async fn add<P: Serialize + ?Sized>(&self, payload: &P) -> Result<TaskId, QueueError> {
        self.dispatcher.ensure_open()?;
        let value = serde_json::to_value(payload)?;
        let text = serde_json::to_string(&value)?;

        let admission = self.dispatcher.admit().await;
        let id = match self
            .dispatcher
            .store()
            .insert(&text, self.dispatcher.now())
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.dispatcher.report_error(&err, Operation::Add);
                return Err(err.into());
            }
        };
        debug!(task_id = %id, "task added");
        self.dispatcher.publish(QueueEvent::Added { id, payload: value });
        drop(admission);

        if self.dispatcher.wants_auto_cycle() {
            self.dispatcher.request_cycle(CycleRequest::Added);
        }
        Ok(id)
    }

    /// Enter continuous mode with `handler`. Returns once the scheduler is
    /// running; the first cycle starts immediately.
    ///
    /// # Errors
    /// - `QueueError::AlreadyProcessing` if called before on this queue
    /// - `QueueError::Closed` after `close()`
    pub fn process<H: TaskHandler + 'static>(&self, handler: H) -> Result<(), QueueError> {
        self.dispatcher.start(Arc::new(handler))
    }

    /// Run exactly one dispatch cycle with `handler` and wait for the tasks
    /// it launched.
    ///
    /// In continuous mode the scheduler then runs a cycle of its own, so rows
    /// and retries this cycle left behind are picked up or waited for.
    pub async fn process_once<H: TaskHandler + 'static>(
        &self,
        handler: H,
    ) -> Result<CycleReport, QueueError> {
        self.dispatcher.ensure_open()?;
        match self.dispatcher.dispatch_cycle(Arc::new(handler)).await {
            Ok(report) => {
                self.dispatcher.resync();
                Ok(report)
            }
            Err(err) => {
                self.dispatcher.report_error(&err, Operation::Dispatch);
                Err(err.into())
            }
        }
    }

    /// Row counts per status, ordered by status text; absent statuses are
    /// omitted.
    pub async fn stats(&self) -> Result<Vec<StatusCount>, QueueError> {
        self.dispatcher
            .store()
            .counts_by_status()
            .await
            .map_err(|err| {
                self.dispatcher.report_error(&err, Operation::Stats);
                err.into()
            })
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>, QueueError> {
        self.dispatcher.store().get(id).await.map_err(|err| {
            self.dispatcher.report_error(&err, Operation::GetTask);
            err.into()
        })
    }

    /// Delete completed tasks last updated more than `older_than_hours` ago.
    /// Returns the number of rows removed.
    pub async fn cleanup(&self, older_than_hours: u64) -> Result<u64, QueueError> {
        let cutoff = cutoff(self.dispatcher.now(), older_than_hours);
        let removed = self
            .dispatcher
            .store()
            .delete_completed_before(cutoff)
            .await
            .map_err(|err| {
                self.dispatcher.report_error(&err, Operation::Cleanup);
                QueueError::from(err)
            })?;
        info!(removed, older_than_hours, "completed tasks cleaned up");
        Ok(removed)
    }

    /// Delete one task regardless of status. Returns whether it existed.
    ///
    /// Removing a task that is currently running does not stop its handler;
    /// the outcome write then finds no row and is dropped.
    pub async fn remove(&self, id: TaskId) -> Result<bool, QueueError> {
        self.dispatcher.store().delete(id).await.map_err(|err| {
            self.dispatcher.report_error(&err, Operation::Remove);
            err.into()
        })
    }

    pub fn status(&self) -> QueueStatus {
        self.dispatcher.status()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.dispatcher.subscribe()
    }

    /// Stop dispatching, wait for running handlers to finish and close the
    /// store. Later `add`/`process` calls fail with `QueueError::Closed`.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.dispatcher.shutdown().await.map_err(|err| {
            self.dispatcher.report_error(&err, Operation::Close);
            err.into()
        })
    }
}

/// Dropping without `close()` stops the scheduler and disarms the wake timer;
/// the store is not closed.
impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.dispatcher.abandon();
    }
}

fn cutoff(now: DateTime<Utc>, older_than_hours: u64) -> DateTime<Utc> {
    i64::try_from(older_than_hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
