//! Pluggable log record serialization.

use thiserror::Error;

use crate::model::LogRecord;

/// A record could not be serialized or deserialized.
#[derive(Debug, Error)]
#[error("log serialization failed: {0}")]
pub struct SerializationError(pub String);

/// Converts log records to and from their persisted representation.
///
/// The durable store persists records as text; hosts may swap in their own
/// codec as long as it round-trips every record the modules produce.
pub trait LogSerializer: Send + Sync {
    /// Serialize one record.
    fn serialize(&self, log: &LogRecord) -> Result<String, SerializationError>;

    /// Deserialize one record.
    fn deserialize(&self, payload: &str) -> Result<LogRecord, SerializationError>;
}

/// Default JSON serializer.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLogSerializer;

impl LogSerializer for JsonLogSerializer {
    fn serialize(&self, log: &LogRecord) -> Result<String, SerializationError> {
        serde_json::to_string(log).map_err(|e| SerializationError(e.to_string()))
    }

    fn deserialize(&self, payload: &str) -> Result<LogRecord, SerializationError> {
        serde_json::from_str(payload).map_err(|e| SerializationError(e.to_string()))
    }
}
