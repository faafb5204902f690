//! Worker Service: the data plane. Heavy, best-effort enrichment work that
//! is expected to fail occasionally without taking the progress bars down
//! with it.

pub mod cover_cache;
pub mod handlers;
pub mod pipeline;
pub mod rename;
pub mod spotify;
pub mod tags;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::api::StateApi;
use crate::config::AppConfig;
use crate::middleware::create_cors_layer;
use crate::store::SettingsStore;

use cover_cache::CoverArtCache;
use pipeline::{MetadataJob, WorkerContext};
use spotify::{SpotifyClient, SpotifyConfig};

/// Interval of the cover-cache expiry sweep.
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state behind the worker's routes.
#[derive(Clone)]
pub struct WorkerState {
    pub context: Arc<WorkerContext>,
    pub jobs: mpsc::UnboundedSender<MetadataJob>,
}

/// Build the worker state: settings, Spotify client, cover cache, and the
/// single-drain job FIFO.
pub fn build_worker_state(config: &AppConfig, spotify_config: SpotifyConfig) -> WorkerState {
    let settings = Arc::new(SettingsStore::load(config));
    let spotify = Arc::new(SpotifyClient::new(spotify_config, settings.credentials()));
    let covers = Arc::new(CoverArtCache::new());
    let state_api = StateApi::new(config.state_base_url());
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client construction cannot fail with static options");

    let context = Arc::new(WorkerContext {
        settings,
        spotify,
        covers,
        state_api,
        http,
    });
    let jobs = pipeline::spawn_job_queue(Arc::clone(&context));

    WorkerState { context, jobs }
}

/// Periodic cover-cache expiry; spawned alongside the HTTP server.
pub fn spawn_cache_cleanup(covers: Arc<CoverArtCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let removed = covers.cleanup(Utc::now());
            if removed > 0 {
                tracing::debug!(removed, "Cover cache cleanup");
            }
        }
    })
}

/// Assemble the Worker Service router.
pub fn create_worker_router(state: WorkerState) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/process-metadata", post(handlers::process_metadata))
        .route("/ensure-album-folder", post(handlers::ensure_album_folder))
        .route("/organize-album", post(handlers::organize_album))
        .route(
            "/set-spotify-credentials",
            post(handlers::set_spotify_credentials),
        )
        .route(
            "/test-spotify-credentials",
            post(handlers::test_spotify_credentials),
        )
        .route("/set-rename-pattern", post(handlers::set_rename_pattern))
        .route("/restart", post(handlers::restart))
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer()),
        )
        .with_state(state)
}
