//! Device snapshot model and its source trait.
//!
//! The channel attaches one immutable [`DeviceInfo`] value to every outgoing
//! log that does not already carry its own. The snapshot is built lazily by
//! a [`DeviceInfoSource`] and shared by reference until the cache is
//! explicitly invalidated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to gather device information.
///
/// A log whose snapshot cannot be built is dropped with a warning; the
/// producer is not notified.
#[derive(Debug, Error)]
#[error("device information unavailable: {0}")]
pub struct DeviceInfoError(pub String);

/// Immutable snapshot of the host device and application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// SDK name (e.g., "courier.rust").
    pub sdk_name: String,
    /// SDK version string.
    pub sdk_version: String,
    /// Device model identifier.
    pub model: String,
    /// Device manufacturer.
    pub oem_name: String,
    /// Operating system name.
    pub os_name: String,
    /// Operating system version.
    pub os_version: String,
    /// OS build identifier, when the platform exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_build: Option<String>,
    /// Active locale (e.g., "en_US").
    pub locale: String,
    /// Offset from UTC in minutes at snapshot time.
    pub time_zone_offset: i32,
    /// Screen size as "WIDTHxHEIGHT", when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<String>,
    /// Host application version.
    pub app_version: String,
    /// Host application build number.
    pub app_build: String,
    /// Host application bundle/package identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_namespace: Option<String>,
}

/// Source of device snapshots.
///
/// Device-info gathering is platform code and lives outside this crate;
/// hosts hand the channel an implementation of this trait. Called under the
/// channel lock, so implementations should be fast and must not re-enter
/// channel APIs.
pub trait DeviceInfoSource: Send + Sync {
    /// Build a fresh snapshot.
    fn device_info(&self) -> Result<DeviceInfo, DeviceInfoError>;
}

/// A [`DeviceInfoSource`] returning a fixed, pre-built snapshot.
///
/// Convenient for hosts that gather device properties once at startup, and
/// for tests.
pub struct StaticDeviceSource {
    info: DeviceInfo,
}

impl StaticDeviceSource {
    /// Wrap a pre-built snapshot.
    pub fn new(info: DeviceInfo) -> Arc<Self> {
        Arc::new(Self { info })
    }
}

impl DeviceInfoSource for StaticDeviceSource {
    fn device_info(&self) -> Result<DeviceInfo, DeviceInfoError> {
        Ok(self.info.clone())
    }
}

#[cfg(test)]
pub(crate) fn test_device() -> DeviceInfo {
    DeviceInfo {
        sdk_name: "courier.rust".to_string(),
        sdk_version: "0.1.0".to_string(),
        model: "unit-test".to_string(),
        oem_name: "none".to_string(),
        os_name: "linux".to_string(),
        os_version: "6.0".to_string(),
        os_build: None,
        locale: "en_US".to_string(),
        time_zone_offset: 0,
        screen_size: None,
        app_version: "1.0.0".to_string(),
        app_build: "1".to_string(),
        app_namespace: None,
    }
}
