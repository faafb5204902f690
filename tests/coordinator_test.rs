//! Integration tests for the plugin coordinator: polling, download
//! triggers, stall fallback, and the completion hook. The host client is
//! mocked; the State Service is real; the Worker Service is stubbed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hydra_plus_backend::config::AppConfig;
use hydra_plus_backend::plugin::{
    Coordinator, PluginConfig, SearchResultFile, SoulseekClient, TransferSnapshot,
};
use hydra_plus_backend::state_service::{build_app_state, create_state_router};
use serde_json::json;
use tokio::sync::Mutex;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct MockClient {
    next_token: AtomicU32,
    started: Mutex<Vec<String>>,
    enqueued: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
    transfers: Mutex<HashMap<String, TransferSnapshot>>,
}

#[async_trait]
impl SoulseekClient for MockClient {
    async fn start_search(&self, query: &str) -> anyhow::Result<u32> {
        self.started.lock().await.push(query.to_string());
        Ok(self.next_token.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn enqueue_download(
        &self,
        _peer: &str,
        virtual_path: &str,
        size_bytes: u64,
    ) -> anyhow::Result<()> {
        self.enqueued.lock().await.push(virtual_path.to_string());
        self.transfers.lock().await.insert(
            virtual_path.to_string(),
            TransferSnapshot {
                bytes_done: 0,
                bytes_total: size_bytes,
            },
        );
        Ok(())
    }

    async fn abort_download(&self, _peer: &str, virtual_path: &str) -> anyhow::Result<()> {
        self.aborted.lock().await.push(virtual_path.to_string());
        Ok(())
    }

    async fn transfer_snapshot(&self, virtual_path: &str) -> Option<TransferSnapshot> {
        self.transfers.lock().await.get(virtual_path).copied()
    }

    fn download_directory(&self) -> PathBuf {
        PathBuf::from("/tmp/downloads")
    }
}

struct Harness {
    coordinator: Arc<Coordinator<MockClient>>,
    client: Arc<MockClient>,
    state_url: String,
    worker: MockServer,
    http: reqwest::Client,
    _dir: tempfile::TempDir,
}

/// Real state service, stubbed worker, mocked host client, instant
/// triggers unless overridden.
async fn harness(tune: impl FnOnce(&mut PluginConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let app_config = AppConfig {
        server_dir: dir.path().to_path_buf(),
        ..AppConfig::default()
    };
    let state = build_app_state(&app_config);
    let router = create_state_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    let state_url = format!("http://{addr}");

    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/process-metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "new_path": "/tmp/downloads/renamed.mp3",
            "renamed": true,
            "moved_to_folder": false,
        })))
        .mount(&worker)
        .await;

    let mut config = PluginConfig {
        state_base_url: state_url.clone(),
        worker_base_url: worker.uri(),
        early_trigger: Duration::ZERO,
        late_trigger: Duration::ZERO,
        stall_grace: Duration::from_secs(3600),
        ..PluginConfig::default()
    };
    tune(&mut config);

    let client = Arc::new(MockClient::default());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&client), config));

    Harness {
        coordinator,
        client,
        state_url,
        worker,
        http: reqwest::Client::new(),
        _dir: dir,
    }
}

impl Harness {
    async fn submit_search(&self, body: serde_json::Value) {
        let response = self
            .http
            .post(format!("{}/search", self.state_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    async fn pending_count(&self) -> usize {
        let body: serde_json::Value = self
            .http
            .get(format!("{}/pending", self.state_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["searches"].as_array().unwrap().len()
    }

    async fn status(&self) -> serde_json::Value {
        self.http
            .get(format!("{}/status", self.state_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    fn result(&self, path: &str, size: u64, bitrate: Option<u32>, duration: Option<u32>) -> SearchResultFile {
        SearchResultFile {
            peer: "peer".to_string(),
            virtual_path: path.to_string(),
            size_bytes: size,
            bitrate,
            duration_seconds: duration,
        }
    }
}

#[tokio::test]
async fn poll_starts_search_and_marks_processed() {
    let h = harness(|_| {}).await;

    h.submit_search(json!({ "artist": "Prince", "track": "Purple Rain", "duration": 525 }))
        .await;
    assert_eq!(h.pending_count().await, 1);

    h.coordinator.poll_once().await.unwrap();

    assert_eq!(h.client.started.lock().await.as_slice(), ["Prince Purple Rain"]);
    assert_eq!(h.coordinator.active_search_count().await, 1);
    assert_eq!(h.pending_count().await, 0);
}

#[tokio::test]
async fn early_trigger_requires_score_strictly_above_100() {
    // Early trigger armed immediately, late trigger far away.
    let h = harness(|c| {
        c.late_trigger = Duration::from_secs(3600);
    })
    .await;

    h.submit_search(json!({ "artist": "Prince", "track": "Purple Rain" }))
        .await;
    h.coordinator.poll_once().await.unwrap();

    // Bitrate 320 => 100 points exactly; nothing else scores (.bin, tiny).
    h.coordinator
        .handle_search_result(1, h.result("x.bin", 1024, Some(320), None))
        .await;
    h.coordinator.evaluate_searches().await;
    assert!(h.client.enqueued.lock().await.is_empty());

    // 320 kbps + 2 MB size step = 120 > 100: downloads immediately.
    h.coordinator
        .handle_search_result(1, h.result("y.bin", 2 * 1024 * 1024, Some(320), None))
        .await;
    h.coordinator.evaluate_searches().await;
    assert_eq!(h.client.enqueued.lock().await.as_slice(), ["y.bin"]);
}

#[tokio::test]
async fn late_trigger_abandons_weak_results() {
    let h = harness(|_| {}).await;

    h.submit_search(json!({ "artist": "Prince", "track": "Purple Rain" }))
        .await;
    h.coordinator.poll_once().await.unwrap();

    // 128 kbps => 40 points; below the late threshold of 50.
    h.coordinator
        .handle_search_result(1, h.result("weak.bin", 1024, Some(128), None))
        .await;
    h.coordinator.evaluate_searches().await;

    assert!(h.client.enqueued.lock().await.is_empty());
    assert_eq!(h.coordinator.active_search_count().await, 0);

    // The abandonment is visible to the UI.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = h.status().await;
    let messages: Vec<String> = status["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap().to_string())
        .collect();
    assert!(messages.iter().any(|m| m.contains("Failed")));
}

#[tokio::test]
async fn stalled_download_falls_back_to_next_candidate() {
    let h = harness(|c| {
        c.stall_grace = Duration::ZERO;
    })
    .await;

    h.submit_search(json!({ "artist": "Prince", "track": "Purple Rain" }))
        .await;
    h.coordinator.poll_once().await.unwrap();

    // Two candidates; the better one by bitrate is tried first.
    h.coordinator
        .handle_search_result(1, h.result(r"a\best.mp3", 9_000_000, Some(320), None))
        .await;
    h.coordinator
        .handle_search_result(1, h.result(r"a\second.mp3", 9_000_000, Some(256), None))
        .await;
    h.coordinator.evaluate_searches().await;
    assert_eq!(h.client.enqueued.lock().await.as_slice(), [r"a\best.mp3"]);

    // Zero bytes moved and the grace window is zero: first attempt aborts,
    // the fallback starts.
    h.coordinator.monitor_downloads().await;
    assert_eq!(h.client.aborted.lock().await.as_slice(), [r"a\best.mp3"]);
    assert_eq!(
        h.client.enqueued.lock().await.as_slice(),
        [r"a\best.mp3", r"a\second.mp3"]
    );

    // Second stall exhausts the candidate list; the search is abandoned.
    h.coordinator.monitor_downloads().await;
    assert_eq!(h.coordinator.active_search_count().await, 0);
    assert_eq!(h.coordinator.active_download_count().await, 0);
}

#[tokio::test]
async fn completion_hands_the_file_to_the_worker() {
    let h = harness(|_| {}).await;

    h.submit_search(json!({
        "artist": "Prince",
        "track": "Purple Rain",
        "album": "Purple Rain",
        "track_id": "abc123",
    }))
    .await;
    h.coordinator.poll_once().await.unwrap();

    h.coordinator
        .handle_search_result(
            1,
            h.result(r"music\Prince - Purple Rain.mp3", 9_000_000, Some(320), None),
        )
        .await;
    h.coordinator.evaluate_searches().await;
    assert_eq!(h.coordinator.active_download_count().await, 1);

    h.coordinator
        .handle_download_complete(
            r"music\Prince - Purple Rain.mp3",
            std::path::Path::new("/tmp/downloads/Prince - Purple Rain.mp3"),
        )
        .await;

    // The completion hook posts /process-metadata in the background.
    let mut received = Vec::new();
    for _ in 0..100 {
        received = h.worker.received_requests().await.unwrap();
        if !received.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = received[0].body_json().unwrap();
    assert_eq!(body["file_path"], "/tmp/downloads/Prince - Purple Rain.mp3");
    assert_eq!(body["artist"], "Prince");
    assert_eq!(body["track_id"], "abc123");

    assert_eq!(h.coordinator.active_search_count().await, 0);
    assert_eq!(h.coordinator.active_download_count().await, 0);
}

#[tokio::test]
async fn flac_preference_selects_the_flac_candidate() {
    let h = harness(|_| {}).await;

    h.submit_search(json!({
        "artist": "Prince",
        "track": "Purple Rain",
        "format_preference": "flac",
    }))
    .await;
    h.coordinator.poll_once().await.unwrap();

    // The mp3 wins on raw score; the preference adjustment flips it.
    h.coordinator
        .handle_search_result(1, h.result(r"a\fileA.mp3", 9_000_000, Some(320), None))
        .await;
    h.coordinator
        .handle_search_result(1, h.result(r"a\fileB.flac", 9_000_000, None, None))
        .await;
    h.coordinator.evaluate_searches().await;

    assert_eq!(h.client.enqueued.lock().await.as_slice(), [r"a\fileB.flac"]);
}

#[tokio::test]
async fn poll_interval_adapts_to_activity() {
    let h = harness(|_| {}).await;

    // Nothing has ever happened: idle cadence.
    assert_eq!(
        h.coordinator.poll_interval().await,
        Duration::from_secs(10)
    );

    h.submit_search(json!({ "artist": "Prince", "track": "Purple Rain" }))
        .await;
    h.coordinator.poll_once().await.unwrap();

    // An active search pins the fast cadence.
    assert_eq!(h.coordinator.poll_interval().await, Duration::from_secs(2));
}
