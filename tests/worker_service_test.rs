//! Integration tests for the Worker Service: the rename/move foreground,
//! pattern application, collision policy, and folder organization.

use hydra_plus_backend::config::AppConfig;
use hydra_plus_backend::worker::spotify::SpotifyConfig;
use hydra_plus_backend::worker::{build_worker_state, create_worker_router};
use serde_json::json;

struct TestWorker {
    base_url: String,
    client: reqwest::Client,
    dir: tempfile::TempDir,
}

async fn spawn_worker() -> TestWorker {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        server_dir: dir.path().join("Server"),
        ..AppConfig::default()
    };

    let state = build_worker_state(&config, SpotifyConfig::default());
    let router = create_worker_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestWorker {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        dir,
    }
}

impl TestWorker {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// A plausible-sized dummy audio file; only the foreground phase is
    /// asserted on, so the content never needs to parse.
    fn write_audio(&self, name: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, vec![0u8; 2048]).unwrap();
        path
    }

    async fn process(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/process-metadata"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn ping_reports_ok() {
    let worker = spawn_worker().await;
    let body: serde_json::Value = worker
        .client
        .get(worker.url("/ping"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_file_is_a_404() {
    let worker = spawn_worker().await;
    let response = worker
        .process(json!({
            "file_path": worker.dir.path().join("nope.mp3").display().to_string(),
            "artist": "Prince",
            "track": "Purple Rain",
        }))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn unsupported_format_is_a_400() {
    let worker = spawn_worker().await;
    let path = worker.write_audio("song.wav");
    let response = worker
        .process(json!({
            "file_path": path.display().to_string(),
            "artist": "Prince",
            "track": "Purple Rain",
        }))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn single_track_renames_with_default_pattern() {
    let worker = spawn_worker().await;
    let path = worker.write_audio("in.mp3");

    let response = worker
        .process(json!({
            "file_path": path.display().to_string(),
            "artist": "Prince",
            "track": "Purple Rain",
            "album": "Purple Rain",
        }))
        .await;
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["renamed"], true);
    assert_eq!(body["moved_to_folder"], false);
    assert!(body["new_path"]
        .as_str()
        .unwrap()
        .ends_with("Prince - Purple Rain.mp3"));

    assert!(worker.dir.path().join("Prince - Purple Rain.mp3").is_file());
    assert!(!path.exists());
}

#[tokio::test]
async fn album_pattern_zero_pads_the_track_number() {
    let worker = spawn_worker().await;
    worker
        .client
        .post(worker.url("/set-rename-pattern"))
        .json(&json!({
            "single_track": "{artist} - {track}",
            "album_track": "{trackNum} {artist} - {track}",
        }))
        .send()
        .await
        .unwrap();

    let path = worker.write_audio("doves.mp3");
    let response = worker
        .process(json!({
            "file_path": path.display().to_string(),
            "artist": "Prince",
            "track": "When Doves Cry",
            "album": "Purple Rain",
            "track_number": 7,
        }))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["new_path"]
        .as_str()
        .unwrap()
        .ends_with("07 Prince - When Doves Cry.mp3"));
}

#[tokio::test]
async fn colliding_renames_get_numbered_suffixes() {
    let worker = spawn_worker().await;

    let first = worker.write_audio("first.mp3");
    let second = worker.write_audio("second.mp3");

    for path in [&first, &second] {
        let response = worker
            .process(json!({
                "file_path": path.display().to_string(),
                "artist": "A",
                "track": "T",
            }))
            .await;
        assert!(response.status().is_success());
    }

    assert!(worker.dir.path().join("A - T.mp3").is_file());
    assert!(worker.dir.path().join("A - T (1).mp3").is_file());
}

#[tokio::test]
async fn process_moves_into_target_folder() {
    let worker = spawn_worker().await;
    let path = worker.write_audio("track.mp3");
    let folder = worker.dir.path().join("Prince - Purple Rain (1984)");

    let response = worker
        .process(json!({
            "file_path": path.display().to_string(),
            "artist": "Prince",
            "track": "Lets Go Crazy",
            "album": "Purple Rain",
            "track_number": 1,
            "target_folder": folder.display().to_string(),
        }))
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["moved_to_folder"], true);
    assert!(folder.join("01 Prince - Lets Go Crazy.mp3").is_file());
}

#[tokio::test]
async fn ensure_album_folder_is_idempotent() {
    let worker = spawn_worker().await;

    let body = json!({
        "album_artist": "Prince",
        "album_name": "Purple Rain",
        "year": 1984,
        "download_dir": worker.dir.path().display().to_string(),
    });

    let first: serde_json::Value = worker
        .client
        .post(worker.url("/ensure-album-folder"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["folder_name"], "Prince - Purple Rain (1984)");

    let second: serde_json::Value = worker
        .client
        .post(worker.url("/ensure-album-folder"))
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["folder_path"], second["folder_path"]);
    assert!(worker
        .dir
        .path()
        .join("Prince - Purple Rain (1984)")
        .is_dir());
}

#[tokio::test]
async fn organize_album_moves_tracks_and_reports_per_track() {
    let worker = spawn_worker().await;
    let a = worker.write_audio("01 one.mp3");
    let b = worker.write_audio("02 two.mp3");
    let missing = worker.dir.path().join("03 three.mp3");

    let body: serde_json::Value = worker
        .client
        .post(worker.url("/organize-album"))
        .json(&json!({
            "track_paths": [a.display().to_string(), b.display().to_string(), missing.display().to_string()],
            "artist": "Prince",
            "album": "Purple Rain",
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["moved"], true);
    assert_eq!(results[1]["moved"], true);
    assert_eq!(results[2]["moved"], false);
    assert!(results[2]["error"].is_string());

    let folder = worker.dir.path().join("Prince - Purple Rain");
    assert!(folder.join("01 one.mp3").is_file());
    assert!(folder.join("02 two.mp3").is_file());
}

#[tokio::test]
async fn credential_test_without_credentials_fails_fast() {
    let worker = spawn_worker().await;
    let body: serde_json::Value = worker
        .client
        .post(worker.url("/test-spotify-credentials"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_path_is_a_404() {
    let worker = spawn_worker().await;
    let response = worker
        .client
        .get(worker.url("/no-such-endpoint"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
