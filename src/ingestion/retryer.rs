//! Retry decorator with exponential backoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ingestion::{Ingestion, IngestionError};
use crate::model::LogContainer;

/// Backoff schedule applied to recoverable failures.
pub const DEFAULT_RETRY_INTERVALS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(5 * 60),
    Duration::from_secs(20 * 60),
];

/// Retries recoverable failures before surfacing them.
///
/// Each attempt after a recoverable failure waits for the next schedule
/// entry, jittered as `d/2 + random(0..d/2)` so a fleet of devices does not
/// retry in lockstep. Fatal errors and exhausted schedules surface
/// immediately; the caller always sees exactly one resolution.
///
/// `close()` cancels sleeping retries; those calls resolve with
/// [`IngestionError::Closed`].
pub struct RetryIngestion {
    inner: Arc<dyn Ingestion>,
    intervals: Vec<Duration>,
    token: Mutex<CancellationToken>,
}

impl std::fmt::Debug for RetryIngestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryIngestion")
            .field("intervals", &self.intervals)
            .finish_non_exhaustive()
    }
}

impl RetryIngestion {
    /// Wrap `inner` with the default schedule.
    pub fn new(inner: Arc<dyn Ingestion>) -> Self {
        Self::with_intervals(inner, DEFAULT_RETRY_INTERVALS.to_vec())
    }

    /// Wrap `inner` with a custom schedule.
    pub fn with_intervals(inner: Arc<dyn Ingestion>, intervals: Vec<Duration>) -> Self {
        Self {
            inner,
            intervals,
            token: Mutex::new(CancellationToken::new()),
        }
    }

    fn current_token(&self) -> CancellationToken {
        self.token.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn jittered(interval: Duration) -> Duration {
    let half = interval / 2;
    half + half.mul_f64(rand::random::<f64>())
}

#[async_trait]
impl Ingestion for RetryIngestion {
    async fn send(
        &self,
        app_secret: &str,
        install_id: Uuid,
        container: &LogContainer,
    ) -> Result<(), IngestionError> {
        let token = self.current_token();
        let mut attempt = 0usize;
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => Err(IngestionError::Closed),
                res = self.inner.send(app_secret, install_id, container) => res,
            };
            match result {
                Err(err)
                    if err.is_recoverable()
                        && !matches!(err, IngestionError::Closed)
                        && attempt < self.intervals.len() =>
                {
                    let delay = jittered(self.intervals[attempt]);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Recoverable ingestion failure, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return Err(IngestionError::Closed),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    fn set_server_url(&self, url: &str) {
        self.inner.set_server_url(url);
    }

    fn close(&self) {
        let mut token = self.token.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Inner transport failing a scripted number of times before succeeding.
    struct FlakyIngestion {
        attempts: AtomicUsize,
        failures: usize,
        error: IngestionError,
    }

    impl FlakyIngestion {
        fn new(failures: usize, error: IngestionError) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                failures,
                error,
            })
        }
    }

    #[async_trait]
    impl Ingestion for FlakyIngestion {
        async fn send(
            &self,
            _app_secret: &str,
            _install_id: Uuid,
            _container: &LogContainer,
        ) -> Result<(), IngestionError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }

        fn set_server_url(&self, _url: &str) {}

        fn close(&self) {}
    }

    fn container() -> LogContainer {
        LogContainer::new(vec![LogRecord::new("event")])
    }

    fn short_intervals() -> Vec<Duration> {
        vec![
            Duration::from_millis(5),
            Duration::from_millis(5),
            Duration::from_millis(5),
        ]
    }

    #[tokio::test]
    async fn test_retries_recoverable_until_success() {
        let inner = FlakyIngestion::new(2, IngestionError::Network("reset".to_string()));
        let retryer = RetryIngestion::with_intervals(inner.clone(), short_intervals());

        retryer
            .send("secret", Uuid::new_v4(), &container())
            .await
            .unwrap();
        assert_eq!(inner.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_fails_immediately() {
        let inner = FlakyIngestion::new(
            usize::MAX,
            IngestionError::Status {
                code: 400,
                body: String::new(),
            },
        );
        let retryer = RetryIngestion::with_intervals(inner.clone(), short_intervals());

        let err = retryer
            .send("secret", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(inner.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_schedule_surfaces_error() {
        let inner = FlakyIngestion::new(
            usize::MAX,
            IngestionError::Status {
                code: 503,
                body: String::new(),
            },
        );
        let retryer = RetryIngestion::with_intervals(inner.clone(), short_intervals());

        let err = retryer
            .send("secret", Uuid::new_v4(), &container())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Status { code: 503, .. }));
        // Initial attempt plus one per schedule entry
        assert_eq!(inner.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_close_cancels_sleeping_retry() {
        let inner = FlakyIngestion::new(usize::MAX, IngestionError::Network("down".to_string()));
        let retryer = Arc::new(RetryIngestion::with_intervals(
            inner,
            vec![Duration::from_secs(3600)],
        ));

        let sender = Arc::clone(&retryer);
        let task = tokio::spawn(async move {
            sender.send("secret", Uuid::new_v4(), &container()).await
        });

        // Give the first attempt time to fail and enter the backoff sleep
        tokio::time::sleep(Duration::from_millis(50)).await;
        retryer.close();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("close should wake the retry")
            .unwrap();
        assert!(matches!(result, Err(IngestionError::Closed)));
    }

    #[test]
    fn test_jitter_bounds() {
        let interval = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered(interval);
            assert!(d >= interval / 2);
            assert!(d < interval);
        }
    }
}
