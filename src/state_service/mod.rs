//! State Service: the state plane. Small, cheap, and designed to never
//! crash; its survival keeps progress bars visible even if the worker dies.

pub mod handlers;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::middleware::create_cors_layer;
use crate::models::{EventSubmission, ProgressUpdate};
use crate::store::{EventLog, ProgressTable, QueueStore, SettingsStore};

/// Interval of the periodic store cleanup.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Work handed off by the fire-and-forget endpoints. A single applier task
/// drains this channel, which preserves per-`track_id` arrival order.
pub enum StateUpdate {
    Progress(ProgressUpdate),
    Event(EventSubmission),
}

#[derive(Default)]
pub struct Counters {
    pub searches_queued: AtomicU64,
    pub handler_errors: AtomicU64,
}

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueStore>,
    pub events: Arc<EventLog>,
    pub progress: Arc<ProgressTable>,
    pub settings: Arc<SettingsStore>,
    pub updates: mpsc::UnboundedSender<StateUpdate>,
    pub counters: Arc<Counters>,
    pub started_at: Instant,
    /// Published in `/status` so consumers can detect restarts without
    /// relying on the event-id regression heuristic.
    pub startup_nonce: u64,
}

/// Build the state plane: stores, the update applier, and a fresh nonce.
pub fn build_app_state(config: &AppConfig) -> AppState {
    let queue = Arc::new(QueueStore::new(config.queue_file()));
    let events = Arc::new(EventLog::new());
    let progress = Arc::new(ProgressTable::new());
    let settings = Arc::new(SettingsStore::load(config));

    let (updates, rx) = mpsc::unbounded_channel();
    spawn_update_applier(Arc::clone(&events), Arc::clone(&progress), rx);

    AppState {
        queue,
        events,
        progress,
        settings,
        updates,
        counters: Arc::new(Counters::default()),
        started_at: Instant::now(),
        startup_nonce: rand::thread_rng().gen(),
    }
}

/// Drain fire-and-forget updates in arrival order.
fn spawn_update_applier(
    events: Arc<EventLog>,
    progress: Arc<ProgressTable>,
    mut rx: mpsc::UnboundedReceiver<StateUpdate>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            match update {
                StateUpdate::Progress(update) => progress.update(&update, Utc::now()),
                StateUpdate::Event(submission) => {
                    events.add(submission.kind, submission.message, submission.track_id);
                }
            }
        }
    })
}

/// Periodic cleanup of all three stores.
pub fn spawn_cleanup(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = Utc::now();
            let stale_progress = state.progress.cleanup(now);
            let expired_events = state.events.cleanup(now);
            let purged_searches = match state.queue.cleanup(now).await {
                Ok(purged) => purged,
                Err(error) => {
                    tracing::warn!(%error, "Queue cleanup failed");
                    0
                }
            };
            if stale_progress + expired_events + purged_searches > 0 {
                tracing::debug!(
                    stale_progress,
                    expired_events,
                    purged_searches,
                    "Periodic cleanup"
                );
            }
        }
    })
}

/// Count 5xx responses; handler bugs must be visible in `/status` without
/// ever terminating the process.
async fn count_server_errors(
    axum::extract::State(counters): axum::extract::State<Arc<Counters>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if response.status().is_server_error() {
        counters.handler_errors.fetch_add(1, Ordering::Relaxed);
    }
    response
}

/// Assemble the State Service router.
pub fn create_state_router(state: AppState) -> Router {
    let counters = Arc::clone(&state.counters);
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/status", get(handlers::status))
        .route("/search", post(handlers::search))
        .route("/search-album", post(handlers::search_album))
        .route("/pending", get(handlers::pending))
        .route("/mark-processed", post(handlers::mark_processed))
        .route("/progress", post(handlers::progress))
        .route("/remove-progress", post(handlers::remove_progress))
        .route("/clear-progress", post(handlers::clear_progress))
        .route("/event", post(handlers::event))
        .route(
            "/set-spotify-credentials",
            post(handlers::set_spotify_credentials),
        )
        .route(
            "/test-spotify-credentials",
            post(handlers::test_spotify_credentials),
        )
        .route("/set-rename-pattern", post(handlers::set_rename_pattern))
        .route("/get-debug-mode", get(handlers::get_debug_mode))
        .route("/set-debug-mode", post(handlers::set_debug_mode))
        .route("/restart", post(handlers::restart))
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer())
                .layer(axum::middleware::from_fn_with_state(
                    counters,
                    count_server_errors,
                )),
        )
        .with_state(state)
}
