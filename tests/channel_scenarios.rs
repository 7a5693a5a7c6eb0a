//! End-to-end channel scenarios: enqueue through durable buffering to
//! (mock) ingestion, covering flush triggers, failure handling, and
//! restart pickup.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use courier::{
    ChannelBuilder, ChannelError, DeviceInfo, GroupListener, Ingestion, IngestionError,
    LogContainer, LogRecord, StaticDeviceSource, TelemetryChannel,
};
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::Semaphore;
use uuid::Uuid;

// =============================================================================
// Test doubles
// =============================================================================

/// Transport double: answers from a script (default success), optionally
/// holding every call until a permit is released.
struct TestIngestion {
    responses: Mutex<VecDeque<Result<(), IngestionError>>>,
    sent: Mutex<Vec<Vec<LogRecord>>>,
    permits: Option<Arc<Semaphore>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl TestIngestion {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            permits: None,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    fn gated(permits: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            permits: Some(permits),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    fn push_response(&self, response: Result<(), IngestionError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn sent(&self) -> Vec<Vec<LogRecord>> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn max_in_flight(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ingestion for TestIngestion {
    async fn send(
        &self,
        _app_secret: &str,
        _install_id: Uuid,
        container: &LogContainer,
    ) -> Result<(), IngestionError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(permits) = &self.permits {
            permits.acquire().await.unwrap().forget();
        }
        self.sent.lock().unwrap().push(container.logs.clone());
        let result = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn set_server_url(&self, _url: &str) {}

    fn close(&self) {}
}

/// Group listener recording callback order as "kind:seq" strings.
#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl GroupListener for RecordingListener {
    fn on_before_sending(&self, log: &LogRecord) {
        self.push(format!("before:{}", seq(log)));
    }

    fn on_success(&self, log: &LogRecord) {
        self.push(format!("success:{}", seq(log)));
    }

    fn on_failure(&self, log: &LogRecord, error: &ChannelError) {
        let kind = match error {
            ChannelError::Cancelled => "cancelled",
            ChannelError::Recoverable(_) => "recoverable",
            ChannelError::Fatal(_) => "fatal",
        };
        self.push(format!("failure:{}:{kind}", seq(log)));
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn seq(log: &LogRecord) -> i64 {
    log.properties
        .get("seq")
        .and_then(|v| v.as_i64())
        .unwrap_or(-1)
}

fn log(seq: i64) -> LogRecord {
    LogRecord::new("event").with_property("seq", json!(seq))
}

fn status(code: u16) -> IngestionError {
    IngestionError::Status {
        code,
        body: String::new(),
    }
}

fn device() -> DeviceInfo {
    DeviceInfo {
        sdk_name: "courier.rust".to_string(),
        sdk_version: "0.1.0".to_string(),
        model: "integration-test".to_string(),
        oem_name: "none".to_string(),
        os_name: "linux".to_string(),
        os_version: "6.0".to_string(),
        os_build: None,
        locale: "en_US".to_string(),
        time_zone_offset: 0,
        screen_size: None,
        app_version: "1.0.0".to_string(),
        app_build: "1".to_string(),
        app_namespace: None,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn build_channel(dir: &Path, ingestion: Arc<TestIngestion>) -> TelemetryChannel {
    init_tracing();
    ChannelBuilder::new("test-secret", dir)
        .ingestion(ingestion)
        .device_source(StaticDeviceSource::new(device()))
        .build()
        .unwrap()
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

const WAIT: Duration = Duration::from_secs(10);

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_size_triggered_flush() {
    let dir = tempdir().unwrap();
    let ingestion = TestIngestion::new();
    let listener = RecordingListener::new();
    let channel = build_channel(dir.path(), ingestion.clone());
    channel.add_group("g", 2, Duration::from_secs(60), 1, Some(listener.clone()));

    channel.enqueue(log(1), "g");
    channel.enqueue(log(2), "g");

    assert!(wait_until(WAIT, || ingestion.sent_count() == 1));
    let sent = ingestion.sent();
    assert_eq!(
        sent[0].iter().map(seq).collect::<Vec<_>>(),
        vec![1, 2],
        "one batch with both logs in enqueue order"
    );

    assert!(wait_until(WAIT, || listener.events().len() == 4));
    assert_eq!(
        listener.events(),
        vec!["before:1", "before:2", "success:1", "success:2"]
    );
    assert_eq!(channel.pending_log_count("g"), Some(0));
    assert!(channel.is_enabled());
}

#[test]
fn test_time_triggered_flush() {
    let dir = tempdir().unwrap();
    let ingestion = TestIngestion::new();
    let channel = build_channel(dir.path(), ingestion.clone());
    channel.add_group("g", 10, Duration::from_millis(150), 1, None);

    channel.enqueue(log(1), "g");

    // Not flushed by size; the timer must do it
    assert!(wait_until(WAIT, || ingestion.sent_count() == 1));
    let sent = ingestion.sent();
    assert_eq!(sent[0].iter().map(seq).collect::<Vec<_>>(), vec![1]);
    assert_eq!(channel.pending_log_count("g"), Some(0));
}

#[test]
fn test_recoverable_failure_suspends_and_resends_on_enable() {
    let dir = tempdir().unwrap();
    let ingestion = TestIngestion::new();
    let listener = RecordingListener::new();
    let channel = build_channel(dir.path(), ingestion.clone());
    channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

    ingestion.push_response(Err(status(503)));
    channel.enqueue(log(1), "g");

    assert!(wait_until(WAIT, || ingestion.sent_count() == 1));
    assert!(wait_until(WAIT, || !channel.is_enabled()));
    // The batch went back to pending; the listener saw no failure
    assert!(wait_until(WAIT, || channel.pending_log_count("g") == Some(1)));
    assert_eq!(listener.events(), vec!["before:1"]);

    // Re-enable: the same log is claimed and sent again
    channel.set_enabled(true);
    assert!(wait_until(WAIT, || ingestion.sent_count() == 2));
    let sent = ingestion.sent();
    assert_eq!(sent[1].iter().map(seq).collect::<Vec<_>>(), vec![1]);
    assert!(wait_until(WAIT, || {
        listener.events().contains(&"success:1".to_string())
    }));
    assert_eq!(channel.pending_log_count("g"), Some(0));
}

#[test]
fn test_fatal_failure_discards_and_rejects_new_logs() {
    let dir = tempdir().unwrap();
    let ingestion = TestIngestion::new();
    let listener = RecordingListener::new();
    let channel = build_channel(dir.path(), ingestion.clone());
    channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

    ingestion.push_response(Err(status(400)));
    channel.enqueue(log(1), "g");

    assert!(wait_until(WAIT, || {
        listener.events().contains(&"failure:1:fatal".to_string())
    }));
    assert!(wait_until(WAIT, || !channel.is_enabled()));
    assert_eq!(channel.pending_log_count("g"), Some(0));

    // Discard mode: new logs are rejected synchronously, not persisted
    channel.enqueue(log(2), "g");
    let events = listener.events();
    assert!(events.contains(&"before:2".to_string()));
    assert!(events.contains(&"failure:2:cancelled".to_string()));
    assert_eq!(ingestion.sent_count(), 1);

    // The store was drained: a fresh registration counts zero rows
    channel.add_group("g", 1, Duration::from_secs(60), 1, None);
    assert!(wait_until(WAIT, || channel.pending_log_count("g") == Some(0)));
    assert_eq!(ingestion.sent_count(), 1);
}

#[test]
fn test_parallelism_bound_and_fifo() {
    let dir = tempdir().unwrap();
    let permits = Arc::new(Semaphore::new(0));
    let ingestion = TestIngestion::gated(Arc::clone(&permits));
    let channel = build_channel(dir.path(), ingestion.clone());
    channel.add_group("g", 1, Duration::from_secs(60), 3, None);

    for n in 1..=5 {
        channel.enqueue(log(n), "g");
    }

    // The transport is blocked; exactly three batches may be in flight
    assert!(wait_until(WAIT, || ingestion.max_in_flight() == 3));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(ingestion.max_in_flight(), 3);
    assert_eq!(ingestion.sent_count(), 0);

    // Release everything; all five logs arrive exactly once, still bounded
    permits.add_permits(5);
    assert!(wait_until(WAIT, || ingestion.sent_count() == 5));
    let mut delivered: Vec<i64> = ingestion.sent().iter().map(|batch| seq(&batch[0])).collect();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
    assert!(ingestion.max_in_flight() <= 3);
    assert!(wait_until(WAIT, || channel.pending_log_count("g") == Some(0)));
}

#[test]
fn test_fifo_order_with_single_parallel_batch() {
    let dir = tempdir().unwrap();
    let ingestion = TestIngestion::new();
    let channel = build_channel(dir.path(), ingestion.clone());
    channel.add_group("g", 1, Duration::from_secs(60), 1, None);

    for n in 1..=5 {
        channel.enqueue(log(n), "g");
    }

    assert!(wait_until(WAIT, || ingestion.sent_count() == 5));
    let order: Vec<i64> = ingestion.sent().iter().map(|batch| seq(&batch[0])).collect();
    assert_eq!(order, vec![1, 2, 3, 4, 5], "batches leave in enqueue order");
    assert_eq!(ingestion.max_in_flight(), 1);
}

#[test]
fn test_shutdown_persists_and_next_process_flushes() {
    let dir = tempdir().unwrap();

    let first_install_id = {
        let ingestion = TestIngestion::new();
        let channel = build_channel(dir.path(), ingestion.clone());
        channel.add_group("g", 100, Duration::from_secs(3600), 1, None);
        channel.enqueue(log(7), "g");

        let start = Instant::now();
        channel.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(ingestion.sent_count(), 0, "log must not have been flushed");
        channel.install_id()
        // Channel dropped here; the store worker stops and releases the db
    };

    // "Next process": same data dir, fresh channel
    let ingestion = TestIngestion::new();
    let channel = build_channel(dir.path(), ingestion.clone());
    assert_eq!(channel.install_id(), first_install_id);

    channel.add_group("g", 1, Duration::from_secs(60), 1, None);
    assert!(wait_until(WAIT, || ingestion.sent_count() == 1));
    let sent = ingestion.sent();
    assert_eq!(sent[0].iter().map(seq).collect::<Vec<_>>(), vec![7]);
}

// =============================================================================
// Error-classification boundaries, end to end
// =============================================================================

#[test]
fn test_recoverable_codes_suspend_and_retain() {
    for code in [408, 429, 500, 502, 504] {
        let dir = tempdir().unwrap();
        let ingestion = TestIngestion::new();
        let listener = RecordingListener::new();
        let channel = build_channel(dir.path(), ingestion.clone());
        channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

        ingestion.push_response(Err(status(code)));
        channel.enqueue(log(1), "g");

        assert!(
            wait_until(WAIT, || !channel.is_enabled()),
            "{code} should suspend the channel"
        );
        assert!(
            wait_until(WAIT, || channel.pending_log_count("g") == Some(1)),
            "{code} should retain the row"
        );
        assert_eq!(listener.events(), vec!["before:1"], "{code}: no failure callback");
    }
}

#[test]
fn test_fatal_codes_discard() {
    for code in [400, 401, 403, 404, 413] {
        let dir = tempdir().unwrap();
        let ingestion = TestIngestion::new();
        let listener = RecordingListener::new();
        let channel = build_channel(dir.path(), ingestion.clone());
        channel.add_group("g", 1, Duration::from_secs(60), 1, Some(listener.clone()));

        ingestion.push_response(Err(status(code)));
        channel.enqueue(log(1), "g");

        assert!(
            wait_until(WAIT, || listener
                .events()
                .contains(&"failure:1:fatal".to_string())),
            "{code} should surface a fatal failure"
        );
        assert!(wait_until(WAIT, || !channel.is_enabled()));
        assert_eq!(
            channel.pending_log_count("g"),
            Some(0),
            "{code} should not retain the row"
        );
    }
}

// =============================================================================
// Full HTTP stack
// =============================================================================

#[test]
fn test_end_to_end_over_http() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/logs?api-version=1.0.0")
        .match_header("App-Secret", "test-secret")
        .match_header(
            "Install-ID",
            mockito::Matcher::Regex("^[0-9a-f-]{36}$".to_string()),
        )
        .match_body(mockito::Matcher::PartialJson(json!({
            "logs": [{"type": "event", "seq": 1}]
        })))
        .with_status(200)
        .create();

    let dir = tempdir().unwrap();
    let channel = ChannelBuilder::new("test-secret", dir.path())
        .server_url(server.url())
        .device_source(StaticDeviceSource::new(device()))
        .build()
        .unwrap();
    channel.add_group("g", 1, Duration::from_secs(60), 1, None);

    channel.enqueue(log(1), "g");

    assert!(wait_until(WAIT, || mock.matched()));
    mock.assert();
    assert!(channel.is_enabled());
}
