//! Listener traits for feature modules and SDK-wide observers.
//!
//! Listeners run while the channel lock is held: they must be fast, must
//! not block, and must not re-enter channel APIs.

use crate::channel::ChannelError;
use crate::model::LogRecord;

/// Per-group delivery callbacks, provided by the owning feature module.
///
/// All methods default to no-ops so modules only override what they need.
pub trait GroupListener: Send + Sync {
    /// Called for each log just before it becomes part of an outgoing
    /// batch (or just before it is reported as failed during a drain).
    fn on_before_sending(&self, log: &LogRecord) {
        let _ = log;
    }

    /// Called for each log of a batch the endpoint accepted.
    fn on_success(&self, log: &LogRecord) {
        let _ = log;
    }

    /// Called when the channel decides a log is lost: fatal transport
    /// failure, cancellation, or a discard-mode enqueue.
    fn on_failure(&self, log: &LogRecord, error: &ChannelError) {
        let _ = (log, error);
    }
}

/// SDK-wide enqueue observer.
pub trait ChannelListener: Send + Sync {
    /// Called synchronously during enqueue, before persistence. The
    /// listener may decorate the log in place.
    fn on_enqueuing_log(&self, log: &mut LogRecord, group: &str);
}
