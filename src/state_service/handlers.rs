//! State Service HTTP handlers. None of these touch the network or do
//! heavy I/O; `/status` must answer fast under all conditions.

use std::sync::atomic::Ordering;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{
    AlbumSubmission, DebugSettings, EventSubmission, EventType, FormatPreference,
    MarkProcessedRequest, ProgressUpdate, RenamePatterns, SearchKind, SearchRequest,
    SearchSubmission, SpotifyCredentials,
};

use super::{AppState, StateUpdate};

type Body<T> = std::result::Result<Json<T>, JsonRejection>;

pub async fn ping() -> Json<&'static str> {
    Json("pong")
}

/// Everything the popup needs, in one cheap snapshot.
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "events": state.events.all(),
        "activeDownloads": state.progress.snapshot(),
        "uptime": state.started_at.elapsed().as_secs(),
        "startupNonce": state.startup_nonce,
        "counters": {
            "searchesQueued": state.counters.searches_queued.load(Ordering::Relaxed),
            "eventsEmitted": state.events.emitted(),
            "handlerErrors": state.counters.handler_errors.load(Ordering::Relaxed),
        },
    }))
}

pub async fn search(
    State(state): State<AppState>,
    payload: Body<SearchSubmission>,
) -> Result<Json<serde_json::Value>> {
    let Json(submission) = payload?;

    let has_query = !submission.query.trim().is_empty();
    let has_pair =
        !submission.artist.trim().is_empty() && !submission.track.trim().is_empty();
    if !has_query && !has_pair {
        return Err(AppError::MissingField {
            field: "query or artist+track".to_string(),
        });
    }

    let query = if has_query {
        submission.query.clone()
    } else {
        format!("{} {}", submission.artist, submission.track)
    };

    let request = SearchRequest {
        search_id: 0,
        kind: SearchKind::Track,
        query,
        artist: submission.artist.clone(),
        track: submission.track.clone(),
        album: submission.album.clone(),
        track_id: submission.track_id.clone(),
        duration_seconds: submission.duration_seconds,
        format_preference: submission.format_preference.unwrap_or(FormatPreference::Mp3),
        auto_download: submission.auto_download.unwrap_or(true),
        metadata_override: submission.metadata_override.unwrap_or(true),
        tracks: Vec::new(),
        year: None,
        timestamp: Utc::now(),
        processed: false,
    };

    let stored = state
        .queue
        .append(request)
        .await
        .map_err(|e| AppError::internal(format!("queue append failed: {e:#}")))?;

    state.counters.searches_queued.fetch_add(1, Ordering::Relaxed);
    state.events.add(
        EventType::Info,
        format!("Queued: {} - {}", stored.artist, stored.track),
        if stored.track_id.is_empty() {
            None
        } else {
            Some(stored.track_id.clone())
        },
    );
    tracing::info!(search_id = stored.search_id, query = %stored.query, "Search queued");

    Ok(Json(json!({ "success": true, "search_id": stored.search_id })))
}

pub async fn search_album(
    State(state): State<AppState>,
    payload: Body<AlbumSubmission>,
) -> Result<Json<serde_json::Value>> {
    let Json(submission) = payload?;

    if submission.album_artist.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "album_artist".to_string(),
        });
    }
    if submission.album_name.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "album_name".to_string(),
        });
    }
    if submission.tracks.is_empty() {
        return Err(AppError::MissingField {
            field: "tracks".to_string(),
        });
    }

    let request = SearchRequest {
        search_id: 0,
        kind: SearchKind::Album,
        // Folder-oriented searching keys off the combined album query.
        query: format!("{} {}", submission.album_artist, submission.album_name),
        artist: submission.album_artist.clone(),
        track: String::new(),
        album: submission.album_name.clone(),
        track_id: String::new(),
        duration_seconds: 0,
        format_preference: submission.format_preference.unwrap_or(FormatPreference::Mp3),
        auto_download: submission.auto_download.unwrap_or(true),
        metadata_override: submission.metadata_override.unwrap_or(true),
        tracks: submission.tracks,
        year: submission.year,
        timestamp: Utc::now(),
        processed: false,
    };

    let stored = state
        .queue
        .append(request)
        .await
        .map_err(|e| AppError::internal(format!("queue append failed: {e:#}")))?;

    state.counters.searches_queued.fetch_add(1, Ordering::Relaxed);
    state.events.add(
        EventType::Info,
        format!(
            "Queued album: {} - {} ({} tracks)",
            stored.artist,
            stored.album,
            stored.tracks.len()
        ),
        None,
    );
    tracing::info!(search_id = stored.search_id, album = %stored.album, "Album search queued");

    Ok(Json(json!({ "success": true, "search_id": stored.search_id })))
}

pub async fn pending(State(state): State<AppState>) -> Json<serde_json::Value> {
    let searches = state.queue.list_unprocessed().await;
    Json(json!({ "searches": searches }))
}

pub async fn mark_processed(
    State(state): State<AppState>,
    payload: Body<MarkProcessedRequest>,
) -> Result<Json<serde_json::Value>> {
    let Json(request) = payload?;
    if request.timestamp.is_none() && request.search_ids.is_none() {
        return Err(AppError::MissingField {
            field: "timestamp or search_ids".to_string(),
        });
    }

    let marked = state
        .queue
        .mark_processed(&request)
        .await
        .map_err(|e| AppError::internal(format!("queue update failed: {e:#}")))?;
    tracing::debug!(marked, "Marked searches processed");

    Ok(Json(json!({ "success": true })))
}

/// Fire-and-forget: the update is applied by a background task after this
/// reply is already on the wire.
pub async fn progress(
    State(state): State<AppState>,
    payload: Body<ProgressUpdate>,
) -> Result<Json<serde_json::Value>> {
    let Json(update) = payload?;
    if state.updates.send(StateUpdate::Progress(update)).is_err() {
        tracing::warn!("Update applier is gone, progress ping dropped");
    }
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub struct RemoveProgressRequest {
    pub track_id: String,
}

pub async fn remove_progress(
    State(state): State<AppState>,
    payload: Body<RemoveProgressRequest>,
) -> Result<Json<serde_json::Value>> {
    let Json(request) = payload?;
    state.progress.remove(&request.track_id);
    Ok(Json(json!({ "success": true })))
}

pub async fn clear_progress(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.progress.clear();
    Json(json!({ "success": true, "cleared": cleared }))
}

/// Fire-and-forget, same channel as `/progress`.
pub async fn event(
    State(state): State<AppState>,
    payload: Body<EventSubmission>,
) -> Result<Json<serde_json::Value>> {
    let Json(submission) = payload?;
    if state.updates.send(StateUpdate::Event(submission)).is_err() {
        tracing::warn!("Update applier is gone, event ping dropped");
    }
    Ok(Json(json!({ "success": true })))
}

pub async fn set_spotify_credentials(
    State(state): State<AppState>,
    payload: Body<SpotifyCredentials>,
) -> Result<Json<serde_json::Value>> {
    let Json(credentials) = payload?;
    state.settings.set_credentials(credentials).await;
    Ok(Json(json!({ "success": true })))
}

/// Presence check only; full verification lives in the worker, which
/// actually talks to Spotify.
pub async fn test_spotify_credentials(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "success": state.settings.has_credentials() }))
}

pub async fn set_rename_pattern(
    State(state): State<AppState>,
    payload: Body<RenamePatterns>,
) -> Result<Json<serde_json::Value>> {
    let Json(patterns) = payload?;
    state.settings.set_patterns(patterns);
    Ok(Json(json!({ "success": true })))
}

pub async fn get_debug_mode(State(state): State<AppState>) -> Json<DebugSettings> {
    Json(state.settings.debug())
}

pub async fn set_debug_mode(
    State(state): State<AppState>,
    payload: Body<DebugSettings>,
) -> Result<Json<serde_json::Value>> {
    let Json(settings) = payload?;
    state.settings.set_debug(settings).await;
    Ok(Json(json!({ "success": true })))
}

/// Reply first, terminate shortly after; a supervisor respawns the process.
pub async fn restart() -> Json<serde_json::Value> {
    tracing::info!("Restart requested, exiting shortly");
    tokio::spawn(async {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        std::process::exit(0);
    });
    Json(json!({ "success": true }))
}

pub async fn not_found() -> AppError {
    AppError::NotFound {
        resource: "unknown path".to_string(),
    }
}
