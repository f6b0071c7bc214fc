//! Status - point-in-time views of the queue.

use serde::Serialize;

/// Dispatcher state at the time of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Handler invocations currently holding a slot.
    pub current_running: usize,
    pub max_concurrent: usize,
    /// A continuous-mode dispatch cycle is in flight.
    pub is_processing: bool,
    pub auto_process: bool,
    /// `process()` has installed a handler.
    pub has_handler: bool,
    /// A wake timer is waiting for the next retry.
    pub wake_armed: bool,
}
