//! Log record and batch envelope types.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::DeviceInfo;

/// A single telemetry record produced by a feature module.
///
/// The channel treats the payload as opaque: feature modules put whatever
/// fields they need into `properties`, which are flattened into the
/// serialized object next to the envelope fields. The `kind` discriminator
/// is serialized as `type` and tells the ingestion service how to decode
/// the rest.
///
/// # Example
///
/// ```
/// use courier::LogRecord;
/// use serde_json::json;
///
/// let log = LogRecord::new("event")
///     .with_property("name", json!("checkout_completed"))
///     .with_property("value", json!(42));
/// assert_eq!(log.kind, "event");
/// assert_eq!(log.timestamp, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Record type discriminator (e.g., "event", "error_report").
    #[serde(rename = "type")]
    pub kind: String,

    /// Wall-clock timestamp in milliseconds since the Unix epoch.
    ///
    /// Zero means "unset"; the channel stamps the current time during
    /// enqueue if the producer did not set one.
    #[serde(default)]
    pub timestamp: i64,

    /// Optional session correlation id, serialized as `sid`.
    #[serde(default, rename = "sid", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,

    /// Device snapshot, shared by reference across logs of one process.
    ///
    /// Usually attached by the channel during enqueue; a producer may
    /// pre-set its own snapshot (e.g. for crash reports captured earlier).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Arc<DeviceInfo>>,

    /// Module-specific payload fields, flattened into the wire object.
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Create a new record of the given type with an unset timestamp.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: 0,
            session_id: None,
            device: None,
            properties: serde_json::Map::new(),
        }
    }

    /// Set the session id.
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Set the timestamp in milliseconds since the Unix epoch.
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = millis;
        self
    }

    /// Add a payload property.
    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// Wire envelope for one batch of logs: `{"logs": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogContainer {
    /// Batch content, in persistence (enqueue) order.
    pub logs: Vec<LogRecord>,
}

impl LogContainer {
    /// Wrap a batch of logs.
    pub fn new(logs: Vec<LogRecord>) -> Self {
        Self { logs }
    }
}
