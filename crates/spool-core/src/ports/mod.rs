//! Ports - the seams between the queue and its collaborators.
//!
//! The dispatcher only talks to storage and time through these traits, so
//! the in-memory store, the SQLite store and test clocks are interchangeable.

pub mod clock;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::task_store::{StoreError, TaskStore};
