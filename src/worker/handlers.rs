//! Worker Service HTTP handlers.

use std::path::{Path, PathBuf};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use serde_json::json;
use tokio::sync::oneshot;

use crate::error::{AppError, Result};
use crate::models::{
    EnsureAlbumFolderRequest, EnsureAlbumFolderResponse, OrganizeAlbumRequest,
    OrganizeAlbumResponse, OrganizeTrackResult, ProcessMetadataRequest, ProcessMetadataResponse,
    RenamePatterns, SpotifyCredentials,
};

use super::pipeline::MetadataJob;
use super::rename;
use super::WorkerState;

type Body<T> = std::result::Result<Json<T>, JsonRejection>;

pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Enqueue the file on the worker FIFO and reply once rename+move is done.
/// Tag writing continues in the background after this returns.
pub async fn process_metadata(
    State(state): State<WorkerState>,
    payload: Body<ProcessMetadataRequest>,
) -> Result<Json<ProcessMetadataResponse>> {
    let Json(request) = payload?;
    tracing::info!(file = %request.file_path, track = %request.track, "Metadata request queued");

    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .jobs
        .send(MetadataJob {
            request,
            reply: reply_tx,
        })
        .map_err(|_| AppError::internal("worker queue closed"))?;

    let response = reply_rx
        .await
        .map_err(|_| AppError::internal("worker dropped the job"))??;
    Ok(Json(response))
}

pub async fn ensure_album_folder(
    payload: Body<EnsureAlbumFolderRequest>,
) -> Result<Json<EnsureAlbumFolderResponse>> {
    let Json(request) = payload?;
    if request.album_artist.trim().is_empty() || request.album_name.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "album_artist/album_name".to_string(),
        });
    }

    let (folder_path, folder_name) = tokio::task::spawn_blocking(move || {
        rename::ensure_album_folder(
            Path::new(&request.download_dir),
            &request.album_artist,
            &request.album_name,
            request.year,
        )
    })
    .await
    .map_err(|_| AppError::internal("folder task panicked"))?
    .map_err(|e| AppError::filesystem("creating album folder", e))?;

    Ok(Json(EnsureAlbumFolderResponse {
        folder_path: folder_path.display().to_string(),
        folder_name,
    }))
}

/// Create the album folder next to the tracks and move them in, reporting
/// a per-track outcome rather than failing the batch.
pub async fn organize_album(
    payload: Body<OrganizeAlbumRequest>,
) -> Result<Json<OrganizeAlbumResponse>> {
    let Json(request) = payload?;
    let Some(first) = request.track_paths.first() else {
        return Err(AppError::MissingField {
            field: "track_paths".to_string(),
        });
    };

    let download_dir = Path::new(first)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let response = tokio::task::spawn_blocking(move || {
        let (folder, _) = rename::ensure_album_folder(
            &download_dir,
            &request.artist,
            &request.album,
            request.year,
        )
        .map_err(|e| AppError::filesystem("creating album folder", e))?;

        let results = request
            .track_paths
            .iter()
            .map(|track_path| match rename::move_into_folder(Path::new(track_path), &folder) {
                Ok(new_path) => OrganizeTrackResult {
                    track_path: track_path.clone(),
                    moved: true,
                    new_path: Some(new_path.display().to_string()),
                    error: None,
                },
                Err(error) => OrganizeTrackResult {
                    track_path: track_path.clone(),
                    moved: false,
                    new_path: None,
                    error: Some(error.to_string()),
                },
            })
            .collect();

        Ok::<_, AppError>(OrganizeAlbumResponse {
            folder_path: folder.display().to_string(),
            results,
        })
    })
    .await
    .map_err(|_| AppError::internal("organize task panicked"))??;

    Ok(Json(response))
}

pub async fn set_spotify_credentials(
    State(state): State<WorkerState>,
    payload: Body<SpotifyCredentials>,
) -> Result<Json<serde_json::Value>> {
    let Json(credentials) = payload?;
    state.context.settings.set_credentials(credentials.clone()).await;
    state.context.spotify.set_credentials(credentials).await;
    Ok(Json(json!({ "success": true })))
}

/// Full verification: actually acquires a token, unlike the State Service
/// variant which only checks for presence.
pub async fn test_spotify_credentials(
    State(state): State<WorkerState>,
) -> Json<serde_json::Value> {
    let success = state.context.spotify.verify_credentials().await;
    Json(json!({ "success": success }))
}

pub async fn set_rename_pattern(
    State(state): State<WorkerState>,
    payload: Body<RenamePatterns>,
) -> Result<Json<serde_json::Value>> {
    let Json(patterns) = payload?;
    tracing::info!(
        single = %patterns.single_track,
        album = %patterns.album_track,
        "Rename patterns updated"
    );
    state.context.settings.set_patterns(patterns);
    Ok(Json(json!({ "success": true })))
}

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
