//! Courier - Device Telemetry Ingestion Channel
//!
//! This crate is the delivery core of a device telemetry SDK: feature
//! modules (analytics, error reporting, ...) enqueue log records into
//! named groups, and the channel buffers them durably, batches them by
//! group policy, and forwards batches to a remote ingestion endpoint with
//! retry, network-state gating, and graceful degradation.
//!
//! # Architecture
//!
//! - **Model**: log records with a `type` discriminator, device snapshots,
//!   pluggable serialization
//! - **Store**: embedded database owned by a dedicated worker thread;
//!   batch-claim semantics make delivery at-least-once across restarts
//! - **Ingestion**: HTTP transport wrapped by retry backoff and a
//!   network-state gate
//! - **Channel**: per-group batching state machines (size and time
//!   triggers, bounded parallelism) and the suspend/discard lifecycle
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use courier::{ChannelBuilder, LogRecord};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build the channel (spawns the store worker and transport runtime)
//!     let channel = ChannelBuilder::new("my-app-secret", "./telemetry").build()?;
//!
//!     // Each feature module owns one group with its batching policy
//!     channel.add_group("analytics", 50, Duration::from_secs(3), 3, None);
//!
//!     // Producers fire and forget
//!     let log = LogRecord::new("event").with_property("name", json!("app_start"));
//!     channel.enqueue(log, "analytics");
//!
//!     // Flush buffered writes before exiting
//!     channel.shutdown();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod ingestion;
pub mod model;
pub mod prefs;
pub mod store;

// Re-export public types
pub use channel::{
    BuildError, ChannelBuilder, ChannelError, ChannelListener, GroupListener, TelemetryChannel,
};
pub use ingestion::{
    DEFAULT_SERVER_URL, HttpIngestion, Ingestion, IngestionError, NetworkStateIngestion,
    NetworkStateMonitor, RetryIngestion,
};
pub use model::{
    DeviceInfo, DeviceInfoError, DeviceInfoSource, JsonLogSerializer, LogContainer, LogRecord,
    LogSerializer, SerializationError, StaticDeviceSource,
};
pub use prefs::Preferences;
pub use store::{AsyncStore, ClaimedBatch, LogStore, StoreActor, StoreError};
