//! Network-state gating for batch delivery.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ingestion::{Ingestion, IngestionError};
use crate::model::LogContainer;

/// Connectivity flag fed by the host platform.
///
/// The SDK has no portable way to watch connectivity itself; the host
/// flips this monitor from its platform callbacks. The default state is
/// online.
pub struct NetworkStateMonitor {
    tx: watch::Sender<bool>,
}

impl std::fmt::Debug for NetworkStateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStateMonitor")
            .field("online", &self.is_online())
            .finish()
    }
}

impl NetworkStateMonitor {
    /// Create a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Report a connectivity change.
    pub fn set_online(&self, online: bool) {
        let previous = self.tx.send_replace(online);
        if previous != online {
            tracing::info!(online, "Network state changed");
        }
    }

    /// Current connectivity state.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkStateMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Defers sends while the device is offline.
///
/// Calls submitted while offline park in a fair queue and resume in
/// submission order once connectivity returns. A disconnect while a call
/// is in flight fails that call with a recoverable network error; the
/// underlying request is dropped.
pub struct NetworkStateIngestion {
    inner: Arc<dyn Ingestion>,
    monitor: Arc<NetworkStateMonitor>,
    /// Fair async mutex; its FIFO wait queue preserves submission order of
    /// deferred calls.
    order: tokio::sync::Mutex<()>,
    token: Mutex<CancellationToken>,
}

impl std::fmt::Debug for NetworkStateIngestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStateIngestion").finish_non_exhaustive()
    }
}

impl NetworkStateIngestion {
    /// Gate `inner` behind `monitor`.
    pub fn new(inner: Arc<dyn Ingestion>, monitor: Arc<NetworkStateMonitor>) -> Self {
        Self {
            inner,
            monitor,
            order: tokio::sync::Mutex::new(()),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    fn current_token(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Resolves once the watched state reads offline.
async fn wait_offline(rx: &mut watch::Receiver<bool>) {
    loop {
        if !*rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Monitor dropped; connectivity will never change again.
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl Ingestion for NetworkStateIngestion {
    async fn send(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<(), IngestionError> {
        let token = self.current_token();

        // Defer while offline; the fair mutex queue keeps deferred calls
        // in submission order.
        {
            let _slot = tokio::select! {
                _ = token.cancelled() => return Err(IngestionError::Closed),
                slot = self.order.lock() => slot,
            };
            let mut rx = self.monitor.subscribe();
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                tracing::debug!("Network offline, deferring batch send");
                tokio::select! {
                    _ = token.cancelled() => return Err(IngestionError::Closed),
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return Err(IngestionError::Network(
                                "network monitor dropped".to_string(),
                            ));
                        }
                    }
                }
            }
        }

        // In flight: fail fast on disconnect so the batch is retained.
        let mut rx = self.monitor.subscribe();
        tokio::select! {
            _ = token.cancelled() => Err(IngestionError::Closed),
            _ = wait_offline(&mut rx) => {
                tracing::warn!("Network lost while a batch was in flight");
                Err(IngestionError::Network(
                    "connection lost while request was in flight".to_string(),
                ))
            }
            res = self.inner.send(app_secret, install_id, container) => res,
        }
    }

    fn set_server_url(&self, url: &str) {
        self.inner.set_server_url(url);
    }

    fn close(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        drop(token);
        self.inner.close();
    }
}
