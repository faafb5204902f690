//! Per-file enrichment pipeline: rename → move → ack → background
//! (metadata fetch → cover → tag write → terminal event → progress
//! removal).
//!
//! Requests drain through a single FIFO so tag writes never run
//! concurrently with the foreground of the next file, while background
//! enrichment of file N-1 may overlap the foreground of file N.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::api::StateApi;
use crate::error::AppError;
use crate::models::{EventType, ProcessMetadataRequest, ProcessMetadataResponse};
use crate::store::SettingsStore;

use super::cover_cache::CoverArtCache;
use super::rename::{self, RenameContext};
use super::spotify::{ScrapedTrackMetadata, SpotifyClient};
use super::tags::{self, TagData};

/// Delay before background enrichment starts, giving the ack and any
/// follow-up foreground work a head start.
const BACKGROUND_STAGGER: Duration = Duration::from_millis(500);

/// Shared dependencies of the worker pipeline.
pub struct WorkerContext {
    pub settings: Arc<SettingsStore>,
    pub spotify: Arc<SpotifyClient>,
    pub covers: Arc<CoverArtCache>,
    pub state_api: StateApi,
    pub http: reqwest::Client,
}

/// One queued `/process-metadata` request and its reply slot.
pub struct MetadataJob {
    pub request: ProcessMetadataRequest,
    pub reply: oneshot::Sender<crate::error::Result<ProcessMetadataResponse>>,
}

/// Result of the foreground (pre-ack) phase.
pub struct ForegroundOutcome {
    pub new_path: PathBuf,
    pub renamed: bool,
    pub moved_to_folder: bool,
}

/// Spawn the single drain task; the returned sender is the worker's FIFO.
///
/// A job is acked as soon as its rename+move finished; its background
/// enrichment overlaps the next job's foreground.
pub fn spawn_job_queue(context: Arc<WorkerContext>) -> mpsc::UnboundedSender<MetadataJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<MetadataJob>();

    tokio::spawn(async move {
        while let Some(MetadataJob { request, reply }) = rx.recv().await {
            match run_foreground(&context, &request).await {
                Ok(outcome) => {
                    let response = ProcessMetadataResponse {
                        success: true,
                        new_path: outcome.new_path.display().to_string(),
                        renamed: outcome.renamed,
                        moved_to_folder: outcome.moved_to_folder,
                    };
                    let _ = reply.send(Ok(response));

                    let context = Arc::clone(&context);
                    let new_path = outcome.new_path;
                    tokio::spawn(async move {
                        run_background(context, request, new_path).await;
                    });
                }
                Err(error) => {
                    let _ = reply.send(Err(error));
                }
            }
        }
    });

    tx
}

impl ProcessMetadataRequest {
    fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.track)
    }
}

/// Validate, rename, and move. Runs before the HTTP reply so the caller's
/// observed latency is capped at filesystem time.
pub async fn run_foreground(
    context: &WorkerContext,
    request: &ProcessMetadataRequest,
) -> crate::error::Result<ForegroundOutcome> {
    let source = PathBuf::from(&request.file_path);
    if !source.is_file() {
        return Err(AppError::NotFound {
            resource: request.file_path.clone(),
        });
    }

    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if extension != "mp3" && extension != "flac" {
        return Err(AppError::UnsupportedFormat { extension });
    }

    let patterns = context.settings.patterns();
    let is_album_track = request.target_folder.is_some() || request.track_number > 0;
    let pattern = if is_album_track {
        patterns.album_track
    } else {
        patterns.single_track
    };

    let rename_context = RenameContext {
        artist: request.artist.clone(),
        track: request.track.clone(),
        album: request.album.clone(),
        year: request.prefetched_year,
        track_number: request.track_number,
    };

    // Rename first: even if everything after this crashes, the file lands
    // under its correct name instead of an orphaned temporary one.
    let mut new_path = source.clone();
    let mut renamed = false;
    if let Some(basename) = rename::build_basename(&pattern, &rename_context, &source) {
        let parent = source.parent().map(Path::to_path_buf).unwrap_or_default();
        let target = parent.join(&basename);
        if target != source {
            let target = rename::unique_path(&target);
            tokio::fs::rename(&source, &target)
                .await
                .map_err(|e| AppError::filesystem(format!("renaming to {}", target.display()), e))?;
            tracing::info!(from = %source.display(), to = %target.display(), "Renamed");
            new_path = target;
            renamed = true;
        }
    }

    // Move into the album folder immediately after, for the same reason.
    // A failed move is partial success, not an error: the caller learns
    // `moved_to_folder: false` and the file keeps its renamed path.
    let mut moved_to_folder = false;
    if let Some(folder) = &request.target_folder {
        let folder = PathBuf::from(folder);
        let move_result = std::fs::create_dir_all(&folder)
            .and_then(|()| rename::move_into_folder(&new_path, &folder));
        match move_result {
            Ok(path) => {
                tracing::info!(to = %path.display(), "Moved into album folder");
                new_path = path;
                moved_to_folder = true;
            }
            Err(error) => {
                tracing::warn!(folder = %folder.display(), %error, "Album folder move failed");
                context.state_api.emit_event_detached(
                    EventType::Warning,
                    format!("Could not move into album folder: {}", request.display_name()),
                    some_track_id(request),
                );
            }
        }
    }

    Ok(ForegroundOutcome {
        new_path,
        renamed,
        moved_to_folder,
    })
}

/// Background enrichment. Runs after the ack; failures log and emit an
/// event but never take down the worker or the next job.
pub async fn run_background(
    context: Arc<WorkerContext>,
    request: ProcessMetadataRequest,
    path: PathBuf,
) {
    tokio::time::sleep(BACKGROUND_STAGGER).await;

    if let Err(error) = enrich(&context, &request, &path).await {
        tracing::error!(track = %request.display_name(), %error, "Background enrichment failed");
        context.state_api.emit_event_detached(
            EventType::Error,
            format!("Failed: {} ({error:#})", request.display_name()),
            some_track_id(&request),
        );
    }

    if !request.track_id.is_empty() {
        context
            .state_api
            .remove_progress_detached(request.track_id.clone());
    }
}

async fn enrich(
    context: &WorkerContext,
    request: &ProcessMetadataRequest,
    path: &Path,
) -> Result<()> {
    // The ack already went out with this path; a file that vanished since
    // is the one hard failure this phase reports as an error event.
    tokio::fs::metadata(path)
        .await
        .with_context(|| format!("file missing at tag time: {}", path.display()))?;

    // Callers that already hold album-level metadata pass it in so a batch
    // does not scrape once per track.
    let scraped = if request.prefetched_year.is_some() || request.prefetched_image_url.is_some() {
        ScrapedTrackMetadata {
            year: request.prefetched_year,
            track_number: None,
            image_url: request.prefetched_image_url.clone(),
        }
    } else if !request.track_id.is_empty() {
        context.spotify.scrape_track_page(&request.track_id).await
    } else {
        ScrapedTrackMetadata::default()
    };

    let details = if !request.track_id.is_empty() && context.spotify.has_credentials().await {
        context.spotify.api_lookup(&request.track_id).await
    } else {
        Default::default()
    };

    let cover = match &scraped.image_url {
        Some(url) => fetch_cover(context, url, request).await,
        None => None,
    };

    let track_number = if request.track_number > 0 {
        Some(request.track_number)
    } else {
        scraped.track_number
    };

    let outcome = tags::write_tags(
        path,
        TagData {
            title: request.track.clone(),
            artist: request.artist.clone(),
            album: request.album.clone(),
            year: scraped.year,
            track_number,
            genre: details.genres,
            label: details.label,
            cover,
        },
    )
    .await;

    let (kind, message) = if outcome.tags_updated {
        (
            EventType::Success,
            format!("Complete: {}", request.display_name()),
        )
    } else {
        (
            EventType::Warning,
            format!("Metadata write failed: {}", request.display_name()),
        )
    };
    context
        .state_api
        .emit_event_detached(kind, message, some_track_id(request));

    Ok(())
}

/// Cache-first cover download; an album batch downloads the image once.
async fn fetch_cover(
    context: &WorkerContext,
    url: &str,
    request: &ProcessMetadataRequest,
) -> Option<Vec<u8>> {
    if let Some(hit) = context.covers.get(url, Utc::now()) {
        return Some(hit.as_ref().clone());
    }

    context.state_api.emit_event_detached(
        EventType::Info,
        format!("Downloading cover art: {}", request.display_name()),
        some_track_id(request),
    );

    match download_cover(&context.http, url).await {
        Ok(bytes) => {
            context.covers.put(url, bytes.clone(), Utc::now());
            Some(bytes)
        }
        Err(error) => {
            tracing::debug!(url, %error, "Cover download failed");
            None
        }
    }
}

async fn download_cover(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .await
        .context("requesting cover art")?
        .error_for_status()
        .context("cover request returned an error status")?;
    let bytes = response.bytes().await.context("reading cover body")?;
    Ok(bytes.to_vec())
}

fn some_track_id(request: &ProcessMetadataRequest) -> Option<String> {
    if request.track_id.is_empty() {
        None
    } else {
        Some(request.track_id.clone())
    }
}
