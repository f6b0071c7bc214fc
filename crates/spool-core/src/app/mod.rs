//! App - the queue itself, wired from the domain, ports and handlers.
//!
//! # Components
//! - **QueueBuilder**: wiring and fail-fast validation
//! - **TaskQueue**: public operations (`add`, `process`, `stats`, ...)
//! - **Dispatcher**: dispatch cycles, slot accounting, continuous loop
//! - **WakeTimer**: the single idle/retry wake-up
//! - **EventBus**: broadcast of `QueueEvent`s

pub mod builder;
pub mod config;
pub mod dispatcher;
pub(crate) mod events;
pub mod queue;
pub mod status;
pub(crate) mod wake;

pub use self::builder::QueueBuilder;
pub use self::config::QueueConfig;
pub use self::dispatcher::CycleReport;
pub use self::queue::TaskQueue;
pub use self::status::QueueStatus;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
