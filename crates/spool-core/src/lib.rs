//! spool-core
//!
//! Persistent, single-process task queue: tasks are stored durably, run by a
//! user handler with bounded concurrency, and retried with exponential
//! backoff until a retry budget runs out.
//!
//! # Modules
//! - **domain**: task rows, status, retry policy, events
//! - **ports**: `TaskStore` and `Clock` seams
//! - **app**: `TaskQueue`, builder, dispatcher, wake timer
//! - **typed**: handler traits (`TaskHandler`, typed `Handler<T>`)
//! - **impls**: in-memory and SQLite stores
//!
//! # Example
//! ```ignore
//! let queue = TaskQueue::open_sqlite("tasks.db", QueueConfig::default()).await?;
//! queue.process(handler_fn(|ctx: TaskContext| async move {
//!     send_email(&ctx.payload).await.map_err(|err| HandlerError::new(err.to_string()))?;
//!     Ok(json!({ "sent": true }))
//! }))?;
//! queue.add(&json!({ "to": "someone@example.com" })).await?;
//! ```

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{CycleReport, QueueBuilder, QueueConfig, QueueStatus, TaskQueue};
pub use domain::{Operation, QueueEvent, StatusCount, Task, TaskId, TaskStatus};
pub use error::QueueError;
pub use ports::{StoreError, TaskStore};
pub use typed::{Handler, HandlerError, TaskContext, TaskHandler, handler_fn, typed};
