//! Handler traits - what the dispatcher invokes for each task.
//!
//! Two layers:
//! - **TaskHandler**: object-safe, receives the decoded JSON payload
//! - **Handler<T>**: typed, receives the payload deserialized into `T`
//!
//! `TypedHandler<T, H>` erases a `Handler<T>` into a `TaskHandler`.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::domain::TaskId;

/// What a handler sees of the task it is running.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub id: TaskId,

    /// Failed attempts before this one.
    pub retry_count: u32,

    pub payload: Value,
}

/// Task-level failure. The message is carried verbatim into `retried` and
/// `failed` events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Payload could not be decoded.
    pub fn invalid_data(err: impl fmt::Display) -> Self {
        Self::new(format!("Invalid task data: {err}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(err)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Processes one task. Returning `Err` sends the task through the retry
/// policy; the `Ok` value is published as the `completed` result.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext) -> Result<Value, HandlerError>;
}

/// Closure-backed handler; the closure is called once per attempt.
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap `f` as a [`TaskHandler`].
///
/// ```ignore
/// queue.process(handler_fn(|ctx: TaskContext| async move {
///     Ok(ctx.payload)
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for HandlerFn<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &TaskContext) -> Result<Value, HandlerError> {
        (self.f)(ctx.clone()).await
    }
}

/// Handler for payloads of a known shape.
#[async_trait]
pub trait Handler<T: DeserializeOwned + Send + 'static>: Send + Sync {
    async fn handle(&self, id: TaskId, task: T) -> Result<Value, HandlerError>;
}

pub struct TypedHandler<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

/// Shorthand for [`TypedHandler::new`].
pub fn typed<T, H>(handler: H) -> TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    TypedHandler::new(handler)
}

#[async_trait]
impl<T, H> TaskHandler for TypedHandler<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn handle(&self, ctx: &TaskContext) -> Result<Value, HandlerError> {
        let task: T =
            serde_json::from_value(ctx.payload.clone()).map_err(HandlerError::invalid_data)?;
        self.handler.handle(ctx.id, task).await
    }
}
