//! Per-group batching state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::GroupListener;
use crate::model::LogRecord;

/// Mutable state of one log group, owned by the channel.
pub(crate) struct GroupState {
    /// Group name.
    pub(crate) name: String,
    /// Batch size threshold triggering an immediate flush.
    pub(crate) max_logs_per_batch: usize,
    /// Delay before a partial batch is flushed.
    pub(crate) batch_time_interval: Duration,
    /// Upper bound on concurrently in-flight batches.
    pub(crate) max_parallel_batches: usize,
    /// Module-provided delivery callbacks.
    pub(crate) listener: Option<Arc<dyn GroupListener>>,
    /// Persisted logs not yet claimed by any batch.
    pub(crate) pending_count: i64,
    /// Batches handed to the transport and not yet resolved.
    pub(crate) in_flight: HashMap<Uuid, Vec<LogRecord>>,
    /// Batch claims submitted to the store but not yet dispatched.
    ///
    /// Counted against `max_parallel_batches` so a burst of flush triggers
    /// cannot overshoot the parallelism bound while claims are queued on
    /// the store worker.
    pub(crate) pending_claims: usize,
    /// Armed flush timer, if any.
    pub(crate) timer: Option<JoinHandle<()>>,
}

impl GroupState {
    pub(crate) fn new(
        name: &str,
        max_logs_per_batch: usize,
        batch_time_interval: Duration,
        max_parallel_batches: usize,
        listener: Option<Arc<dyn GroupListener>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            max_logs_per_batch: max_logs_per_batch.max(1),
            batch_time_interval,
            max_parallel_batches: max_parallel_batches.max(1),
            listener,
            pending_count: 0,
            in_flight: HashMap::new(),
            pending_claims: 0,
            timer: None,
        }
    }

    /// Cancel the armed flush timer, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
            tracing::debug!(group = %self.name, "Flush timer cancelled");
        }
    }
}

impl std::fmt::Debug for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupState")
            .field("name", &self.name)
            .field("pending_count", &self.pending_count)
            .field("in_flight", &self.in_flight.len())
            .field("timer_armed", &self.timer.is_some())
            .finish_non_exhaustive()
    }
}
