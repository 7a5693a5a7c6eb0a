//! Channel construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime;

use crate::channel::core::{ChannelInner, ChannelState, TelemetryChannel};
use crate::ingestion::{
    HttpIngestion, Ingestion, NetworkStateIngestion, NetworkStateMonitor, RetryIngestion,
};
use crate::model::{
    DeviceInfo, DeviceInfoSource, JsonLogSerializer, LogSerializer, StaticDeviceSource,
};
use crate::prefs::{KEY_ENABLED, Preferences};
use crate::store::{LogStore, StoreActor, StoreError};

/// Log buffer database file inside the data directory.
const STORE_FILE: &str = "logs.db";

/// Preference file inside the data directory.
const PREFS_FILE: &str = "prefs.json";

/// Worker threads of the transport runtime.
const TRANSPORT_WORKERS: usize = 2;

/// Channel construction failure.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The log store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Data directory or runtime setup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builder for [`TelemetryChannel`].
///
/// # Example
///
/// ```rust,no_run
/// use courier::{ChannelBuilder, LogRecord};
/// use std::time::Duration;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let channel = ChannelBuilder::new("my-app-secret", "./telemetry").build()?;
///     channel.add_group("analytics", 50, Duration::from_secs(3), 3, None);
///     channel.enqueue(LogRecord::new("event"), "analytics");
///     channel.shutdown();
///     Ok(())
/// }
/// ```
pub struct ChannelBuilder {
    app_secret: String,
    data_dir: PathBuf,
    server_url: Option<String>,
    serializer: Option<Box<dyn LogSerializer>>,
    device_source: Option<Arc<dyn DeviceInfoSource>>,
    ingestion: Option<Arc<dyn Ingestion>>,
    retry_intervals: Option<Vec<Duration>>,
}

impl ChannelBuilder {
    /// Start building a channel for `app_secret`, buffering under
    /// `data_dir` (created if missing).
    pub fn new(app_secret: impl Into<String>, data_dir: impl AsRef<Path>) -> Self {
        Self {
            app_secret: app_secret.into(),
            data_dir: data_dir.as_ref().to_path_buf(),
            server_url: None,
            serializer: None,
            device_source: None,
            ingestion: None,
            retry_intervals: None,
        }
    }

    /// Override the ingestion endpoint.
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Replace the JSON log serializer.
    pub fn serializer(mut self, serializer: Box<dyn LogSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// Provide the host's device snapshot source. Strongly recommended;
    /// the built-in fallback only knows generic process facts.
    pub fn device_source(mut self, source: Arc<dyn DeviceInfoSource>) -> Self {
        self.device_source = Some(source);
        self
    }

    /// Replace the whole transport stack (HTTP + retry + network gate).
    /// The network monitor then has no effect.
    pub fn ingestion(mut self, ingestion: Arc<dyn Ingestion>) -> Self {
        self.ingestion = Some(ingestion);
        self
    }

    /// Override the retry backoff schedule of the default transport.
    pub fn retry_intervals(mut self, intervals: Vec<Duration>) -> Self {
        self.retry_intervals = Some(intervals);
        self
    }

    /// Assemble the channel: preferences, store worker, transport stack
    /// and runtime.
    pub fn build(self) -> Result<TelemetryChannel, BuildError> {
        std::fs::create_dir_all(&self.data_dir)?;

        let prefs = Arc::new(Preferences::open(self.data_dir.join(PREFS_FILE)));
        let install_id = prefs.install_id();
        let enabled = prefs.get_bool(KEY_ENABLED, true);

        let serializer = self
            .serializer
            .unwrap_or_else(|| Box::new(JsonLogSerializer));
        let log_store = LogStore::open(self.data_dir.join(STORE_FILE), serializer)?;
        let (store_worker, store) = StoreActor::spawn(log_store)?;

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(TRANSPORT_WORKERS)
            .thread_name("courier-transport")
            .enable_all()
            .build()?;
        let rt_handle = runtime.handle().clone();

        let monitor = Arc::new(NetworkStateMonitor::default());
        let ingestion: Arc<dyn Ingestion> = match self.ingestion {
            Some(custom) => custom,
            None => {
                let http = Arc::new(HttpIngestion::new());
                let retryer: Arc<dyn Ingestion> = match self.retry_intervals {
                    Some(intervals) => Arc::new(RetryIngestion::with_intervals(http, intervals)),
                    None => Arc::new(RetryIngestion::new(http)),
                };
                Arc::new(NetworkStateIngestion::new(retryer, Arc::clone(&monitor)))
            }
        };
        if let Some(url) = &self.server_url {
            ingestion.set_server_url(url);
        }

        let device_source = self
            .device_source
            .unwrap_or_else(|| default_device_source());

        tracing::info!(install_id = %install_id, enabled, "Telemetry channel ready");
        Ok(TelemetryChannel {
            inner: Arc::new(ChannelInner {
                app_secret: self.app_secret,
                install_id,
                store,
                store_worker: Mutex::new(Some(store_worker)),
                ingestion,
                device_source,
                prefs,
                monitor,
                rt_handle,
                runtime: Some(runtime),
                state: Mutex::new(ChannelState {
                    enabled,
                    discard: false,
                    device: None,
                    groups: HashMap::new(),
                    listeners: Vec::new(),
                }),
            }),
        })
    }
}

/// Fallback device source built from generic process facts. Hosts that
/// know their platform should pass a richer [`DeviceInfoSource`].
fn default_device_source() -> Arc<dyn DeviceInfoSource> {
    StaticDeviceSource::new(DeviceInfo {
        sdk_name: "courier.rust".to_string(),
        sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        model: std::env::consts::ARCH.to_string(),
        oem_name: "unknown".to_string(),
        os_name: std::env::consts::OS.to_string(),
        os_version: "unknown".to_string(),
        os_build: None,
        locale: std::env::var("LANG").unwrap_or_else(|_| "en_US".to_string()),
        time_zone_offset: chrono::Local::now().offset().local_minus_utc() / 60,
        screen_size: None,
        app_version: "unknown".to_string(),
        app_build: "unknown".to_string(),
        app_namespace: None,
    })
}
