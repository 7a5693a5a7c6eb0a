//! Durable log storage.
//!
//! Logs are buffered on disk between enqueue and successful delivery:
//!
//! - [`LogStore`]: embedded database holding serialized records per group,
//!   with batch-claim semantics for in-flight delivery
//! - [`StoreActor`]: dedicated worker thread owning the store; all
//!   operations run here sequentially
//! - [`AsyncStore`]: clonable handle submitting operations with completion
//!   callbacks, plus a drain barrier for shutdown
//!
//! The store itself is not thread safe; the actor is the single
//! serialization point, and callbacks observe FIFO submission order.

mod actor;
mod error;
mod handle;
mod log_store;
mod schema;

pub use actor::StoreActor;
pub use error::StoreError;
pub use handle::AsyncStore;
pub use log_store::{ClaimedBatch, LogStore};
