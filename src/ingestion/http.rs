//! HTTP transport for log batches.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::ingestion::{Ingestion, IngestionError};
use crate::model::LogContainer;

/// Default ingestion endpoint, overridable per install.
pub const DEFAULT_SERVER_URL: &str = "https://in.courier-telemetry.dev";

/// API version sent as a query parameter.
const API_VERSION: &str = "1.0.0";

/// Header carrying the application secret.
const HEADER_APP_SECRET: &str = "App-Secret";

/// Header carrying the install id.
const HEADER_INSTALL_ID: &str = "Install-ID";

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum characters of a response body kept in error values.
const MAX_BODY_PREVIEW: usize = 512;

/// Sends batches as `POST {server_url}/logs?api-version=...`.
///
/// Headers carry the app secret and install id; the body is the JSON
/// [`LogContainer`], each log with its `type` discriminator. 2xx counts as
/// accepted; any other status is returned for classification.
pub struct HttpIngestion {
    client: Client,
    server_url: Mutex<String>,
}

impl std::fmt::Debug for HttpIngestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIngestion").finish_non_exhaustive()
    }
}

impl HttpIngestion {
    /// Create a transport pointing at [`DEFAULT_SERVER_URL`].
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            server_url: Mutex::new(DEFAULT_SERVER_URL.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        let base = self
            .server_url
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        format!("{}/logs?api-version={API_VERSION}", base.trim_end_matches('/'))
    }
}

impl Default for HttpIngestion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ingestion for HttpIngestion {
    async fn send(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<(), IngestionError> {
        let url = self.endpoint();
        let response = self
            .client
            .post(&url)
            .header(HEADER_APP_SECRET, app_secret)
            .header(HEADER_INSTALL_ID, install_id.to_string())
            .json(container)
            .send()
            .await
            .map_err(|e| IngestionError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), logs = container.logs.len(), "Batch accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(IngestionError::Status {
            code: status.as_u16(),
            body: truncate_preview(&body),
        })
    }

    fn set_server_url(&self, url: &str) {
        let mut server_url = self.server_url.lock().unwrap_or_else(|e| e.into_inner());
        tracing::info!(url = %url, "Ingestion endpoint changed");
        *server_url = url.to_string();
    }

    fn close(&self) {
        // The pooled connections are released with the client; nothing to
        // tear down eagerly.
        tracing::debug!("HTTP ingestion closed");
    }
}

fn truncate_preview(text: &str) -> String {
    let mut preview: String = text.chars().take(MAX_BODY_PREVIEW).collect();
    if preview.len() < text.len() {
        preview.push('…');
    }
    preview
}
