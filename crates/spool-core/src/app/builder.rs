//! QueueBuilder - wiring of store, clock and configuration.
//!
//! Validation happens in `build()` so a misconfigured queue never starts.

use std::sync::Arc;

use tracing::info;

use super::config::QueueConfig;
use super::queue::TaskQueue;
use crate::error::QueueError;
use crate::ports::{Clock, SystemClock, TaskStore};

/// Builds a [`TaskQueue`].
///
/// # Example
/// ```ignore
/// let queue = TaskQueue::builder()
///     .store(SqliteTaskStore::open("tasks.db").await?)
///     .config(QueueConfig { max_concurrent: 4, ..QueueConfig::default() })
///     .build()?;
/// ```
pub struct QueueBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn TaskStore>>,
    clock: Arc<dyn Clock>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store<S: TaskStore + 'static>(self, store: S) -> Self {
        self.shared_store(Arc::new(store))
    }

    /// Use a store the caller keeps a handle to.
    pub fn shared_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// # Errors
    /// - `QueueError::Config` when no store was given or the configuration
    ///   fails [`QueueConfig::validate`]
    pub fn build(self) -> Result<TaskQueue, QueueError> {
        self.config.validate()?;
        let store = self
            .store
            .ok_or_else(|| QueueError::Config("a task store is required".to_string()))?;

        info!(
            max_concurrent = self.config.max_concurrent,
            max_retries = self.config.max_retries,
            auto_process = self.config.auto_process,
            "task queue built"
        );
        Ok(TaskQueue::from_parts(store, self.clock, &self.config))
    }
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryTaskStore;

    #[test]
    fn build_success() {
        let queue = QueueBuilder::new().store(InMemoryTaskStore::new()).build();
        assert!(queue.is_ok());
    }

    #[test]
    fn build_without_store_fails() {
        let queue = QueueBuilder::new().build();
        assert!(matches!(queue, Err(QueueError::Config(msg)) if msg.contains("store")));
    }

    #[test]
    fn build_with_invalid_config_fails() {
        let queue = QueueBuilder::new()
            .store(InMemoryTaskStore::new())
            .config(QueueConfig {
                max_concurrent: 0,
                ..QueueConfig::default()
            })
            .build();
        assert!(matches!(queue, Err(QueueError::Config(_))));
    }

    #[test]
    fn status_reflects_config() {
        let queue = QueueBuilder::new()
            .store(InMemoryTaskStore::new())
            .config(QueueConfig {
                max_concurrent: 3,
                auto_process: false,
                ..QueueConfig::default()
            })
            .build()
            .unwrap();

        let status = queue.status();
        assert_eq!(status.max_concurrent, 3);
        assert!(!status.auto_process);
        assert!(!status.has_handler);
        assert_eq!(status.current_running, 0);
    }
}
