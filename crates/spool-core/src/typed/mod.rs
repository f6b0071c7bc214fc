//! Typed - handler API.
//!
//! - **surface (typed)**: `Handler<T>`, decodes the payload into `T`
//! - **inside (dyn)**: `TaskHandler`, object-safe, what the dispatcher stores

pub mod handler;

pub use self::handler::{
    Handler, HandlerError, HandlerFn, TaskContext, TaskHandler, TypedHandler, handler_fn, typed,
};
