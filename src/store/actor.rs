//! Store worker thread.
//!
//! Single-owner pattern: one dedicated thread owns the [`LogStore`] and
//! processes commands from an MPSC channel in submission order. Each
//! command carries a completion callback invoked on the worker thread,
//! which gives callers FIFO callback ordering for free.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use uuid::Uuid;

use crate::model::LogRecord;
use crate::store::log_store::{ClaimedBatch, LogStore};
use crate::store::{AsyncStore, StoreError};

/// Completion callback for a store operation.
pub(crate) type StoreCallback<T> = Box<dyn FnOnce(Result<T, StoreError>) + Send + 'static>;

/// Commands processed by the store worker.
pub(crate) enum Command {
    /// Persist one record.
    Put {
        group: String,
        log: LogRecord,
        callback: StoreCallback<()>,
    },
    /// Count pending (unclaimed) records of a group.
    Count {
        group: String,
        callback: StoreCallback<i64>,
    },
    /// Claim a batch of pending records.
    GetLogs {
        group: String,
        limit: usize,
        callback: StoreCallback<Option<ClaimedBatch>>,
    },
    /// Delete the rows of a resolved batch.
    DeleteBatch {
        group: String,
        batch_id: Uuid,
        callback: StoreCallback<()>,
    },
    /// Delete every row of a group.
    DeleteAll {
        group: String,
        callback: StoreCallback<()>,
    },
    /// Release all open batch claims.
    ClearPendingState { callback: StoreCallback<()> },
    /// Drain barrier: acknowledged once all prior commands completed.
    Barrier { done: Sender<()> },
    /// Stop the worker.
    Shutdown,
}

impl Command {
    /// Resolve a command that will never execute.
    pub(crate) fn fail(self, err: StoreError) {
        match self {
            Command::Put { callback, .. }
            | Command::DeleteBatch { callback, .. }
            | Command::DeleteAll { callback, .. }
            | Command::ClearPendingState { callback } => callback(Err(err)),
            Command::Count { callback, .. } => callback(Err(err)),
            Command::GetLogs { callback, .. } => callback(Err(err)),
            Command::Barrier { done } => {
                let _ = done.send(());
            }
            Command::Shutdown => {}
        }
    }
}

/// Dedicated worker thread owning the log store.
pub struct StoreActor {
    store: LogStore,
    rx: Receiver<Command>,
}

impl StoreActor {
    /// Spawn the worker thread around an opened store.
    ///
    /// Returns the join handle and the async facade used to submit work.
    pub fn spawn(store: LogStore) -> Result<(JoinHandle<()>, AsyncStore), StoreError> {
        let (tx, rx): (Sender<Command>, Receiver<Command>) = channel();
        let mut actor = StoreActor { store, rx };
        let handle = thread::Builder::new()
            .name("courier-store".to_string())
            .spawn(move || actor.run())
            .map_err(|e| StoreError::Internal(format!("failed to spawn store worker: {e}")))?;
        Ok((handle, AsyncStore::new(tx)))
    }

    fn run(&mut self) {
        tracing::debug!("Store worker started");

        while let Ok(cmd) = self.rx.recv() {
            if self.handle_command(cmd) {
                break;
            }
        }

        // Resolve whatever is still queued so callbacks are never dropped
        // silently.
        while let Ok(cmd) = self.rx.try_recv() {
            cmd.fail(StoreError::WorkerGone);
        }

        tracing::debug!("Store worker stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Put {
                group,
                log,
                callback,
            } => callback(self.store.put(&group, &log)),
            Command::Count { group, callback } => callback(self.store.count(&group)),
            Command::GetLogs {
                group,
                limit,
                callback,
            } => callback(self.store.get_logs(&group, limit)),
            Command::DeleteBatch {
                group,
                batch_id,
                callback,
            } => callback(self.store.delete_batch(&group, batch_id)),
            Command::DeleteAll { group, callback } => callback(self.store.delete_all(&group)),
            Command::ClearPendingState { callback } => {
                callback(self.store.clear_pending_state().map(|_| ()))
            }
            Command::Barrier { done } => {
                let _ = done.send(());
            }
            Command::Shutdown => {
                tracing::debug!("Store worker shutting down");
                return true;
            }
        }
        false
    }
}
