//! The telemetry channel.
//!
//! Feature modules enqueue logs into named groups; the channel enriches
//! them, buffers them durably, batches them by group policy (size and time
//! thresholds, bounded parallelism), and forwards batches to the ingestion
//! transport. Transport outcomes drive a suspend/discard state machine:
//! recoverable failures pause delivery and keep the buffered rows, fatal
//! failures drain them.
//!
//! Concurrency model: every state mutation happens under one channel-wide
//! lock. I/O never runs under the lock; the store worker, the transport
//! runtime, and the flush timers all call back into the lock when done.

mod builder;
mod core;
mod error;
mod group;
mod listener;

pub use builder::{BuildError, ChannelBuilder};
pub use error::ChannelError;
pub use listener::{ChannelListener, GroupListener};
pub use self::core::TelemetryChannel;
