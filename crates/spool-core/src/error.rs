use thiserror::Error;

use crate::ports::StoreError;

/// Errors returned by the queue's public operations.
///
/// Task-level failures (handler errors, undecodable payloads) never show up
/// here; they go through the retry policy and the event stream instead.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task store failure: {0}")]
    Store(#[from] StoreError),

    #[error("payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid queue configuration: {0}")]
    Config(String),

    #[error("queue is closed")]
    Closed,

    #[error("a handler is already processing this queue")]
    AlreadyProcessing,
}
