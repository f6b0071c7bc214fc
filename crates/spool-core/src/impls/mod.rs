//! Impls - `TaskStore` implementations.
//!
//! - **InMemoryTaskStore**: map-backed, for tests and embedding
//! - **SqliteTaskStore**: durable store (feature `sqlite`)

pub mod inmem_store;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

pub use self::inmem_store::InMemoryTaskStore;
#[cfg(feature = "sqlite")]
pub use self::sqlite_store::SqliteTaskStore;
