//! Channel core: enqueue path, flush scheduling, and the suspend state
//! machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::{Handle, Runtime};
use uuid::Uuid;

use crate::channel::group::GroupState;
use crate::channel::{ChannelError, ChannelListener, GroupListener};
use crate::ingestion::{Ingestion, IngestionError, NetworkStateMonitor};
use crate::model::{DeviceInfo, DeviceInfoSource, LogContainer, LogRecord};
use crate::prefs::{KEY_ENABLED, Preferences};
use crate::store::{AsyncStore, ClaimedBatch, StoreError};

/// Chunk size used when draining a group on fatal suspension.
pub(super) const CLEAR_BATCH_SIZE: usize = 100;

/// How long `shutdown` waits for the store worker to drain.
pub(super) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared channel internals; public operations live on [`TelemetryChannel`].
pub(super) struct ChannelInner {
    pub(super) app_secret: String,
    pub(super) install_id: Uuid,
    pub(super) store: AsyncStore,
    pub(super) store_worker: Mutex<Option<JoinHandle<()>>>,
    pub(super) ingestion: Arc<dyn Ingestion>,
    pub(super) device_source: Arc<dyn DeviceInfoSource>,
    pub(super) prefs: Arc<Preferences>,
    pub(super) monitor: Arc<NetworkStateMonitor>,
    pub(super) rt_handle: Handle,
    pub(super) runtime: Option<Runtime>,
    pub(super) state: Mutex<ChannelState>,
}

/// Channel-wide mutable state, guarded by the single channel lock.
pub(super) struct ChannelState {
    pub(super) enabled: bool,
    pub(super) discard: bool,
    pub(super) device: Option<Arc<DeviceInfo>>,
    pub(super) groups: HashMap<String, GroupState>,
    pub(super) listeners: Vec<Arc<dyn ChannelListener>>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        // Never block here: the last handle may be dropped from an async
        // context.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl ChannelInner {
    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide what to do with a group's pending logs: flush now, arm the
    /// timer, or nothing. Callers hold the channel lock.
    fn check_pending_logs(inner: &Arc<ChannelInner>, st: &mut ChannelState, name: &str) {
        let Some(group) = st.groups.get(name) else {
            tracing::info!(group = %name, "Group no longer registered, stop processing logs");
            return;
        };
        let pending = group.pending_count;
        tracing::debug!(group = %name, pending, "Checking pending logs");
        if pending >= group.max_logs_per_batch as i64 {
            Self::trigger_ingestion(inner, st, name);
        } else if pending > 0 && group.timer.is_none() {
            let interval = group.batch_time_interval;
            tracing::debug!(group = %name, delay_ms = interval.as_millis() as u64, "Arming flush timer");
            let weak = Arc::downgrade(inner);
            let group_name = name.to_string();
            let timer = inner.rt_handle.spawn(async move {
                tokio::time::sleep(interval).await;
                if let Some(inner) = weak.upgrade() {
                    ChannelInner::timer_fired(&inner, &group_name);
                }
            });
            if let Some(group) = st.groups.get_mut(name) {
                group.timer = Some(timer);
            }
        }
    }

    fn timer_fired(inner: &Arc<ChannelInner>, name: &str) {
        let mut st = inner.lock_state();
        if let Some(group) = st.groups.get_mut(name) {
            group.timer = None;
        }
        Self::trigger_ingestion(inner, &mut st, name);
    }

    /// Ask the store for a batch and hand it to the transport, unless the
    /// channel is suspended or the group is already at its parallelism
    /// bound.
    fn trigger_ingestion(inner: &Arc<ChannelInner>, st: &mut ChannelState, name: &str) {
        if !st.enabled {
            return;
        }
        let Some(group) = st.groups.get_mut(name) else {
            return;
        };
        tracing::debug!(group = %name, pending = group.pending_count, "Triggering ingestion");
        group.cancel_timer();

        if group.in_flight.len() + group.pending_claims >= group.max_parallel_batches {
            tracing::debug!(
                group = %name,
                max = group.max_parallel_batches,
                "Already sending the maximum number of parallel batches"
            );
            return;
        }
        group.pending_claims += 1;
        let limit = group.max_logs_per_batch;

        let weak = Arc::downgrade(inner);
        let group_name = name.to_string();
        inner.store.get_logs(name, limit, move |result| {
            let Some(inner) = weak.upgrade() else { return };
            match result {
                Ok(Some(batch)) => ChannelInner::dispatch_batch(&inner, &group_name, batch),
                Ok(None) => {
                    let mut st = inner.lock_state();
                    if let Some(group) = st.groups.get_mut(&group_name) {
                        group.pending_claims = group.pending_claims.saturating_sub(1);
                    }
                }
                Err(e) => {
                    tracing::error!(group = %group_name, error = %e, "Failed to read batch from store");
                    let mut st = inner.lock_state();
                    if let Some(group) = st.groups.get_mut(&group_name) {
                        group.pending_claims = group.pending_claims.saturating_sub(1);
                    }
                }
            }
        });
    }

    /// Register a claimed batch as in flight and start the transport call.
    /// Runs on the store worker thread.
    fn dispatch_batch(inner: &Arc<ChannelInner>, name: &str, batch: ClaimedBatch) {
        let ClaimedBatch { batch_id, logs } = batch;
        let mut st = inner.lock_state();
        let Some(group) = st.groups.get_mut(name) else {
            // Group removed while the claim was queued; the rows stay
            // claimed until the next clear_pending_state.
            tracing::debug!(group = %name, batch_id = %batch_id, "Group gone, abandoning claimed batch");
            return;
        };
        group.pending_claims = group.pending_claims.saturating_sub(1);

        if let Some(listener) = &group.listener {
            for log in &logs {
                listener.on_before_sending(log);
            }
        }
        group.pending_count -= logs.len() as i64;
        tracing::debug!(
            group = %name,
            batch_id = %batch_id,
            count = logs.len(),
            pending = group.pending_count,
            "Sending batch"
        );
        group.in_flight.insert(batch_id, logs.clone());

        let container = LogContainer::new(logs);
        let ingestion = Arc::clone(&inner.ingestion);
        let app_secret = inner.app_secret.clone();
        let install_id = inner.install_id;
        let weak = Arc::downgrade(inner);
        let group_name = name.to_string();
        inner.rt_handle.spawn(async move {
            let result = ingestion.send(&app_secret, install_id, &container).await;
            let Some(inner) = weak.upgrade() else { return };
            match result {
                Ok(()) => ChannelInner::handle_success(&inner, &group_name, batch_id),
                Err(err) => ChannelInner::handle_failure(&inner, &group_name, batch_id, err),
            }
        });

        // A concurrent batch may be allowed right away.
        Self::check_pending_logs(inner, &mut st, name);
    }

    fn handle_success(inner: &Arc<ChannelInner>, name: &str, batch_id: Uuid) {
        let mut st = inner.lock_state();
        let Some(group) = st.groups.get_mut(name) else {
            tracing::debug!(group = %name, batch_id = %batch_id, "Group gone, ignoring send result");
            return;
        };
        let log_group = name.to_string();
        inner.store.delete_batch(name, batch_id, move |result| {
            if let Err(e) = result {
                tracing::error!(group = %log_group, error = %e, "Failed to delete sent batch");
            }
        });
        let Some(logs) = group.in_flight.remove(&batch_id) else {
            // Already resolved by a suspension in the meantime.
            return;
        };
        let listener = group.listener.clone();
        if let Some(listener) = listener {
            for log in &logs {
                listener.on_success(log);
            }
        }
        Self::check_pending_logs(inner, &mut st, name);
    }

    fn handle_failure(inner: &Arc<ChannelInner>, name: &str, batch_id: Uuid, err: IngestionError) {
        let mut st = inner.lock_state();
        let Some(group) = st.groups.get_mut(name) else {
            tracing::debug!(group = %name, batch_id = %batch_id, "Group gone, ignoring send result");
            return;
        };
        tracing::error!(group = %name, batch_id = %batch_id, error = %err, "Sending batch failed");
        let Some(logs) = group.in_flight.remove(&batch_id) else {
            return;
        };
        let recoverable = err.is_recoverable();
        let error = if recoverable {
            ChannelError::Recoverable(err)
        } else {
            ChannelError::Fatal(err)
        };
        if recoverable {
            group.pending_count += logs.len() as i64;
        } else if let Some(listener) = group.listener.clone() {
            for log in &logs {
                listener.on_failure(log, &error);
            }
        }
        Self::suspend(inner, &mut st, !recoverable, &error);
    }

    /// Stop sending until re-enabled. With `delete_logs`, also drop every
    /// buffered row and report each as failed; without, release batch
    /// claims so a later enable resumes where delivery stopped.
    fn suspend(inner: &Arc<ChannelInner>, st: &mut ChannelState, delete_logs: bool, err: &ChannelError) {
        st.enabled = false;
        st.discard = delete_logs;
        tracing::info!(delete_logs, error = %err, "Suspending channel");

        let mut group_names = Vec::with_capacity(st.groups.len());
        for (name, group) in st.groups.iter_mut() {
            group.cancel_timer();
            let in_flight: Vec<(Uuid, Vec<LogRecord>)> = group.in_flight.drain().collect();
            if delete_logs {
                if let Some(listener) = &group.listener {
                    for (_, logs) in &in_flight {
                        for log in logs {
                            listener.on_failure(log, err);
                        }
                    }
                }
            }
            group_names.push(name.clone());
        }

        inner.ingestion.close();

        if delete_logs {
            for name in &group_names {
                Self::drain_group(inner, name);
            }
        } else {
            inner.store.clear_pending_state(|result| {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to release pending batch claims");
                }
            });
        }
    }

    /// Report and delete a group's buffered rows, [`CLEAR_BATCH_SIZE`] at a
    /// time so listener callbacks never hold an unbounded batch.
    fn drain_group(inner: &Arc<ChannelInner>, name: &str) {
        let weak = Arc::downgrade(inner);
        let group_name = name.to_string();
        inner.store.get_logs(name, CLEAR_BATCH_SIZE, move |result| {
            let Some(inner) = weak.upgrade() else { return };
            let batch = match result {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(group = %group_name, error = %e, "Failed to drain group");
                    return;
                }
            };
            let st = inner.lock_state();
            let listener = st.groups.get(&group_name).and_then(|g| g.listener.clone());
            let delete_err = {
                let group = group_name.clone();
                move |result: Result<(), StoreError>| {
                    if let Err(e) = result {
                        tracing::error!(group = %group, error = %e, "Failed to delete drained group");
                    }
                }
            };
            match (batch, listener) {
                (Some(batch), Some(listener)) => {
                    for log in &batch.logs {
                        listener.on_before_sending(log);
                        listener.on_failure(log, &ChannelError::Cancelled);
                    }
                    drop(st);
                    if batch.logs.len() >= CLEAR_BATCH_SIZE {
                        ChannelInner::drain_group(&inner, &group_name);
                    } else {
                        inner.store.delete_all(&group_name, delete_err);
                    }
                }
                _ => {
                    drop(st);
                    inner.store.delete_all(&group_name, delete_err);
                }
            }
        });
    }
}

/// The telemetry ingestion channel.
///
/// Built once per process via [`ChannelBuilder`](crate::ChannelBuilder).
/// All operations are non-blocking except [`shutdown`](Self::shutdown),
/// which waits up to five seconds for buffered writes to reach disk.
pub struct TelemetryChannel {
    pub(super) inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for TelemetryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryChannel")
            .field("install_id", &self.inner.install_id)
            .finish_non_exhaustive()
    }
}

impl TelemetryChannel {
    /// Register a log group with its batching policy.
    ///
    /// Duplicate registration overwrites the previous entry. Buffered logs
    /// from earlier runs are counted asynchronously and flushed per policy.
    pub fn add_group(
        &self,
        name: &str,
        max_logs_per_batch: usize,
        batch_time_interval: Duration,
        max_parallel_batches: usize,
        listener: Option<Arc<dyn GroupListener>>,
    ) {
        let inner = &self.inner;
        let mut st = inner.lock_state();
        tracing::debug!(group = %name, "Adding group");
        let state = GroupState::new(
            name,
            max_logs_per_batch,
            batch_time_interval,
            max_parallel_batches,
            listener,
        );
        if let Some(mut previous) = st.groups.insert(name.to_string(), state) {
            previous.cancel_timer();
            tracing::debug!(group = %name, "Replaced existing group registration");
        }
        drop(st);

        let weak = Arc::downgrade(inner);
        let group_name = name.to_string();
        inner.store.count(name, move |result| {
            let Some(inner) = weak.upgrade() else { return };
            match result {
                Ok(count) => {
                    let mut st = inner.lock_state();
                    if let Some(group) = st.groups.get_mut(&group_name) {
                        group.pending_count = count;
                    }
                    ChannelInner::check_pending_logs(&inner, &mut st, &group_name);
                }
                Err(e) => {
                    tracing::error!(group = %group_name, error = %e, "Failed to count pending logs")
                }
            }
        });
    }

    /// Unregister a group. In-flight batches are abandoned; their results
    /// are ignored when they eventually arrive.
    pub fn remove_group(&self, name: &str) {
        let mut st = self.inner.lock_state();
        if let Some(mut group) = st.groups.remove(name) {
            group.cancel_timer();
            tracing::debug!(group = %name, "Removed group");
        }
    }

    /// Enqueue one log into `group`.
    ///
    /// Fire and forget: the producer is never notified of storage or
    /// delivery problems directly, only through group listeners.
    pub fn enqueue(&self, mut log: LogRecord, group: &str) {
        let inner = &self.inner;
        let mut st = inner.lock_state();

        if !st.groups.contains_key(group) {
            tracing::warn!(group = %group, "Invalid group name, dropping log");
            return;
        }

        if st.discard {
            tracing::warn!(group = %group, "Channel is in discard mode, log rejected");
            let listener = st.groups.get(group).and_then(|g| g.listener.clone());
            if let Some(listener) = listener {
                listener.on_before_sending(&log);
                listener.on_failure(&log, &ChannelError::Cancelled);
            }
            return;
        }

        // Let SDK-wide listeners decorate the log before persistence.
        let listeners = st.listeners.clone();
        for listener in &listeners {
            listener.on_enqueuing_log(&mut log, group);
        }

        if log.device.is_none() {
            if st.device.is_none() {
                match inner.device_source.device_info() {
                    Ok(info) => st.device = Some(Arc::new(info)),
                    Err(e) => {
                        tracing::error!(error = %e, "Device snapshot unavailable, dropping log");
                        return;
                    }
                }
            }
            log.device = st.device.clone();
        }

        if log.timestamp == 0 {
            log.timestamp = Utc::now().timestamp_millis();
        }

        let weak = Arc::downgrade(inner);
        let group_name = group.to_string();
        inner.store.put(group, log, move |result| {
            let Some(inner) = weak.upgrade() else { return };
            match result {
                Ok(()) => {
                    let mut st = inner.lock_state();
                    if let Some(group) = st.groups.get_mut(&group_name) {
                        group.pending_count += 1;
                        tracing::debug!(group = %group_name, pending = group.pending_count, "Log persisted");
                    }
                    if st.enabled {
                        ChannelInner::check_pending_logs(&inner, &mut st, &group_name);
                    } else {
                        tracing::warn!("Channel is temporarily disabled, log was saved to disk");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Error persisting log"),
            }
        });
    }

    /// Delete every buffered row of `group`. In-flight batches are not
    /// affected.
    pub fn clear(&self, group: &str) {
        let group_name = group.to_string();
        self.inner.store.delete_all(group, move |result| {
            if let Err(e) = result {
                tracing::error!(group = %group_name, error = %e, "Failed to clear group");
            }
        });
    }

    /// Enable or disable the channel.
    ///
    /// Disabling suspends delivery and retains buffered rows; enabling
    /// clears discard mode and re-checks every group. The persisted
    /// preference is written through on every call.
    pub fn set_enabled(&self, enabled: bool) {
        let inner = &self.inner;
        let mut st = inner.lock_state();
        inner.prefs.put_bool(KEY_ENABLED, enabled);
        if st.enabled == enabled {
            return;
        }
        if enabled {
            st.enabled = true;
            st.discard = false;
            tracing::info!("Channel enabled");
            let names: Vec<String> = st.groups.keys().cloned().collect();
            for name in names {
                ChannelInner::check_pending_logs(inner, &mut st, &name);
            }
        } else {
            tracing::info!("Channel disabled");
            ChannelInner::suspend(inner, &mut st, false, &ChannelError::Cancelled);
        }
    }

    /// Whether the channel currently forwards logs.
    ///
    /// Also reads false while the channel suspended itself after a
    /// transport failure.
    pub fn is_enabled(&self) -> bool {
        self.inner.lock_state().enabled
    }

    /// Override the ingestion endpoint for subsequent sends.
    pub fn set_server_url(&self, url: &str) {
        self.inner.ingestion.set_server_url(url);
    }

    /// Drop the cached device snapshot; the next enqueue rebuilds it.
    pub fn invalidate_device_cache(&self) {
        self.inner.lock_state().device = None;
    }

    /// Register an SDK-wide enqueue observer.
    pub fn add_listener(&self, listener: Arc<dyn ChannelListener>) {
        self.inner.lock_state().listeners.push(listener);
    }

    /// Unregister a previously added observer.
    pub fn remove_listener(&self, listener: &Arc<dyn ChannelListener>) {
        self.inner
            .lock_state()
            .listeners
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Suspend delivery (retaining rows) and wait up to five seconds for
    /// buffered writes to reach disk. Rows still buffered afterwards are
    /// picked up by the next process.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down channel");
        {
            let mut st = self.inner.lock_state();
            ChannelInner::suspend(&self.inner, &mut st, false, &ChannelError::Cancelled);
        }
        tracing::debug!("Waiting for the store worker to drain");
        if !self
            .inner
            .store
            .wait_for_current_tasks_to_complete(SHUTDOWN_TIMEOUT)
        {
            tracing::warn!("Timed out waiting for the store worker to drain");
        }
    }

    /// Stable per-install id sent with every batch.
    pub fn install_id(&self) -> Uuid {
        self.inner.install_id
    }

    /// Connectivity monitor gating the default transport. Hosts feed
    /// platform connectivity callbacks into it.
    pub fn network_monitor(&self) -> Arc<NetworkStateMonitor> {
        Arc::clone(&self.inner.monitor)
    }

    /// Number of buffered logs of `group` not part of any in-flight batch,
    /// or `None` for an unknown group. Mostly useful for diagnostics and
    /// tests.
    pub fn pending_log_count(&self, group: &str) -> Option<i64> {
        self.inner
            .lock_state()
            .groups
            .get(group)
            .map(|g| g.pending_count)
    }
}

impl Drop for TelemetryChannel {
    fn drop(&mut self) {
        // Stop the store worker and wait for it so the database file is
        // released before the process (or a test) reopens it.
        self.inner.store.shutdown();
        let worker = self
            .inner
            .store_worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}
