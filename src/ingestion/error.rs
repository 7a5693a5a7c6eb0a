//! Transport error taxonomy.

use thiserror::Error;

/// Errors surfaced by the ingestion transport.
///
/// The classification in [`is_recoverable`](Self::is_recoverable) drives
/// the channel state machine: recoverable failures suspend the channel and
/// retain persisted rows, fatal failures discard them.
#[derive(Debug, Clone, Error)]
pub enum IngestionError {
    /// Transport-level failure (DNS, TLS, socket, timeout, offline).
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status.
    #[error("ingestion returned status {code}: {body}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body preview.
        body: String,
    },

    /// The transport was closed while the call was pending.
    #[error("ingestion closed")]
    Closed,
}

impl IngestionError {
    /// Whether the batch should be retained and retried later.
    ///
    /// Deterministic per status code: network errors, 408, 429 and 5xx are
    /// recoverable; every other non-2xx status means the payload will
    /// never be accepted as-is.
    pub fn is_recoverable(&self) -> bool {
        match self {
            IngestionError::Network(_) | IngestionError::Closed => true,
            IngestionError::Status { code, .. } => {
                matches!(code, 408 | 429) || (500..=599).contains(code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> IngestionError {
        IngestionError::Status {
            code,
            body: String::new(),
        }
    }

    #[test]
    fn test_recoverable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(status(code).is_recoverable(), "{code} should be recoverable");
        }
    }

    #[test]
    fn test_fatal_statuses() {
        for code in [400, 401, 403, 404, 413] {
            assert!(!status(code).is_recoverable(), "{code} should be fatal");
        }
    }

    #[test]
    fn test_network_and_closed_recoverable() {
        assert!(IngestionError::Network("connection reset".to_string()).is_recoverable());
        assert!(IngestionError::Closed.is_recoverable());
    }
}
