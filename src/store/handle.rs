//! Async facade over the store worker.

use std::sync::mpsc::{Sender, channel};
use std::time::Duration;

use uuid::Uuid;

use crate::model::LogRecord;
use crate::store::StoreError;
use crate::store::actor::Command;
use crate::store::log_store::ClaimedBatch;

/// Clonable handle submitting store operations to the worker thread.
///
/// Every operation takes a completion callback invoked on the worker
/// thread once the operation ran. Submissions from one caller complete in
/// FIFO order. None of the methods block on I/O; the only blocking entry
/// point is [`wait_for_current_tasks_to_complete`](Self::wait_for_current_tasks_to_complete).
///
/// If the worker has stopped, callbacks fire immediately with
/// [`StoreError::WorkerGone`].
#[derive(Clone)]
pub struct AsyncStore {
    tx: Sender<Command>,
}

impl std::fmt::Debug for AsyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncStore").finish_non_exhaustive()
    }
}

impl AsyncStore {
    pub(crate) fn new(tx: Sender<Command>) -> Self {
        Self { tx }
    }

    /// Persist one record under `group`.
    pub fn put(
        &self,
        group: &str,
        log: LogRecord,
        callback: impl FnOnce(Result<(), StoreError>) + Send + 'static,
    ) {
        self.submit(Command::Put {
            group: group.to_string(),
            log,
            callback: Box::new(callback),
        });
    }

    /// Count pending records of `group`.
    pub fn count(
        &self,
        group: &str,
        callback: impl FnOnce(Result<i64, StoreError>) + Send + 'static,
    ) {
        self.submit(Command::Count {
            group: group.to_string(),
            callback: Box::new(callback),
        });
    }

    /// Claim up to `limit` pending records of `group`.
    pub fn get_logs(
        &self,
        group: &str,
        limit: usize,
        callback: impl FnOnce(Result<Option<ClaimedBatch>, StoreError>) + Send + 'static,
    ) {
        self.submit(Command::GetLogs {
            group: group.to_string(),
            limit,
            callback: Box::new(callback),
        });
    }

    /// Delete the rows claimed under `batch_id`.
    pub fn delete_batch(
        &self,
        group: &str,
        batch_id: Uuid,
        callback: impl FnOnce(Result<(), StoreError>) + Send + 'static,
    ) {
        self.submit(Command::DeleteBatch {
            group: group.to_string(),
            batch_id,
            callback: Box::new(callback),
        });
    }

    /// Delete every row of `group`.
    pub fn delete_all(
        &self,
        group: &str,
        callback: impl FnOnce(Result<(), StoreError>) + Send + 'static,
    ) {
        self.submit(Command::DeleteAll {
            group: group.to_string(),
            callback: Box::new(callback),
        });
    }

    /// Release all open batch claims.
    pub fn clear_pending_state(
        &self,
        callback: impl FnOnce(Result<(), StoreError>) + Send + 'static,
    ) {
        self.submit(Command::ClearPendingState {
            callback: Box::new(callback),
        });
    }

    /// Block until every previously submitted task completed, or `timeout`
    /// elapsed. Returns `true` when the queue drained in time.
    pub fn wait_for_current_tasks_to_complete(&self, timeout: Duration) -> bool {
        let (done, ack) = channel();
        if self.tx.send(Command::Barrier { done }).is_err() {
            // Worker is gone; nothing can be pending.
            return true;
        }
        ack.recv_timeout(timeout).is_ok()
    }

    /// Ask the worker to stop after the commands already queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    fn submit(&self, cmd: Command) {
        if let Err(std::sync::mpsc::SendError(cmd)) = self.tx.send(cmd) {
            tracing::error!("Store worker is gone, failing submitted operation");
            cmd.fail(StoreError::WorkerGone);
        }
    }
}
