//! Domain model: ids, task rows, status, retry policy, events.

pub mod events;
pub mod ids;
pub mod retry;
pub mod state;
pub mod task;

pub use self::events::{Operation, QueueEvent};
pub use self::ids::TaskId;
pub use self::retry::{RetryDecision, RetryPolicy};
pub use self::state::{ParseStatusError, TaskStatus};
pub use self::task::{StatusCount, Task};
