//! Channel-level error taxonomy surfaced to group listeners.

use thiserror::Error;

use crate::ingestion::IngestionError;

/// Why a log was lost (or delivery interrupted).
///
/// Group listeners receive this in `on_failure`; `Cancelled` covers
/// disable, shutdown and discard-mode rejections, the transport variants
/// carry the classified cause.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Delivery was cancelled by disable, shutdown or group removal.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport failed recoverably; buffered rows are retained.
    #[error("recoverable ingestion failure: {0}")]
    Recoverable(IngestionError),

    /// Transport rejected the batch; it will never be accepted as-is.
    #[error("fatal ingestion failure: {0}")]
    Fatal(IngestionError),
}
