//! Core data model for the telemetry pipeline.
//!
//! This module defines the values that flow through the channel:
//!
//! - [`LogRecord`]: a single telemetry record with a `type` discriminator
//! - [`DeviceInfo`]: an immutable device snapshot attached to outgoing logs
//! - [`LogContainer`]: the wire envelope for one batch of logs
//! - [`LogSerializer`]: pluggable record serialization for the durable store

mod device;
mod log;
mod serializer;

pub use device::{DeviceInfo, DeviceInfoError, DeviceInfoSource, StaticDeviceSource};
#[cfg(test)]
pub(crate) use device::test_device;
pub use log::{LogContainer, LogRecord};
pub use serializer::{JsonLogSerializer, LogSerializer, SerializationError};
