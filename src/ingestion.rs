//! Batch delivery to the remote ingestion endpoint.
//!
//! The channel talks to a single [`Ingestion`] trait object. The default
//! stack composes three layers, innermost first:
//!
//! - [`HttpIngestion`]: the actual HTTP call
//! - [`RetryIngestion`]: exponential backoff on recoverable failures
//! - [`NetworkStateIngestion`]: defers sends while the device is offline
//!
//! Errors are classified once, in [`IngestionError::is_recoverable`], and
//! the channel's suspend/discard decisions hang off that classification.

mod error;
mod http;
mod network;
mod retryer;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::LogContainer;

pub use error::IngestionError;
pub use http::{DEFAULT_SERVER_URL, HttpIngestion};
pub use network::{NetworkStateIngestion, NetworkStateMonitor};
pub use retryer::{DEFAULT_RETRY_INTERVALS, RetryIngestion};

/// Transport for one batch of logs.
#[async_trait]
pub trait Ingestion: Send + Sync {
    /// Transmit a batch. Resolves exactly once, with success or a
    /// classified [`IngestionError`].
    async fn send(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<(), IngestionError>;

    /// Override the base endpoint for subsequent sends.
    fn set_server_url(&self, url: &str);

    /// Cancel outstanding work and release connection resources.
    ///
    /// Idempotent; the instance stays usable for later sends (the channel
    /// closes the transport on suspension and sends again after re-enable).
    fn close(&self);
}
