//! Plugin coordinator: polls the State Service for pending requests,
//! drives the host client's search and transfer APIs, scores candidates,
//! watches for stalls, and hands finished files to the Worker Service.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use crate::api::{StateApi, WorkerApi};
use crate::models::{
    AlbumTrack, EnsureAlbumFolderRequest, EventType, MarkProcessedRequest,
    ProcessMetadataRequest, SearchKind, SearchRequest,
};
use crate::worker::rename::sanitize;
use crate::worker::spotify::SpotifyClient;

use super::client::{SearchResultFile, SoulseekClient};
use super::scoring::{self, Candidate, ScoreTarget};

/// Timing and threshold knobs; tests shrink these to milliseconds.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub state_base_url: String,
    pub worker_base_url: String,
    /// Poll interval while any search or download is active.
    pub poll_active: Duration,
    /// Poll interval between 30 s and 5 min since the last activity.
    pub poll_idle: Duration,
    /// Poll interval past 5 min of inactivity.
    pub poll_sleep: Duration,
    pub idle_after: Duration,
    pub sleep_after: Duration,
    /// A download starts this early only for scores strictly above 100.
    pub early_trigger: Duration,
    /// Past this, the best candidate is taken if strictly above 50.
    pub late_trigger: Duration,
    pub early_score_threshold: i64,
    pub late_score_threshold: i64,
    /// Zero transferred bytes for this long marks a download stuck.
    pub stall_grace: Duration,
    pub monitor_interval: Duration,
    pub max_attempts: usize,
    /// Absolute ceiling on one search's lifetime.
    pub search_deadline: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            state_base_url: "http://127.0.0.1:3847".to_string(),
            worker_base_url: "http://127.0.0.1:3848".to_string(),
            poll_active: Duration::from_secs(2),
            poll_idle: Duration::from_secs(10),
            poll_sleep: Duration::from_secs(30),
            idle_after: Duration::from_secs(30),
            sleep_after: Duration::from_secs(300),
            early_trigger: Duration::from_secs(15),
            late_trigger: Duration::from_secs(30),
            early_score_threshold: 100,
            late_score_threshold: 50,
            stall_grace: Duration::from_secs(60),
            monitor_interval: Duration::from_secs(2),
            max_attempts: 5,
            search_deadline: Duration::from_secs(300),
        }
    }
}

/// Per-album bookkeeping: the target folder and the once-per-batch
/// metadata prefetch shared by every track's completion hook.
#[derive(Default)]
struct AlbumState {
    folder_path: Option<String>,
    prefetched_year: Option<u32>,
    prefetched_image_url: Option<String>,
    /// Scored results grouped by (peer, virtual folder).
    folder_results: HashMap<(String, String), Vec<Candidate>>,
}

/// One search in flight at the host client.
struct ActiveSearch {
    request: SearchRequest,
    target: ScoreTarget,
    candidates: Vec<Candidate>,
    /// -1 before the first download attempt, then the candidate index.
    current_attempt: i32,
    started_at: Instant,
    expected_files: usize,
    completed_files: usize,
    album: Option<AlbumState>,
}

impl ActiveSearch {
    fn display_name(&self) -> String {
        if self.request.kind == SearchKind::Album {
            format!("{} - {}", self.request.artist, self.request.album)
        } else {
            format!("{} - {}", self.request.artist, self.request.track)
        }
    }
}

/// One transfer the coordinator is responsible for.
struct ActiveDownload {
    token: u32,
    track_id: Option<String>,
    file_name: String,
    size_bytes: u64,
    last_bytes: u64,
    last_change: Instant,
}

#[derive(Default)]
struct CoordinatorInner {
    searches: HashMap<u32, ActiveSearch>,
    downloads: HashMap<String, ActiveDownload>,
    seen_search_ids: HashSet<u64>,
    last_activity: Option<Instant>,
}

/// The long-lived coordinator embedded in the host client.
pub struct Coordinator<C: SoulseekClient> {
    client: Arc<C>,
    state_api: StateApi,
    worker_api: WorkerApi,
    /// Credential-less scraper for the once-per-album metadata prefetch.
    page_scraper: SpotifyClient,
    config: PluginConfig,
    inner: Mutex<CoordinatorInner>,
}

impl<C: SoulseekClient> Coordinator<C> {
    pub fn new(client: Arc<C>, config: PluginConfig) -> Self {
        Self::with_scraper(client, config, SpotifyClient::new(Default::default(), Default::default()))
    }

    pub fn with_scraper(client: Arc<C>, config: PluginConfig, page_scraper: SpotifyClient) -> Self {
        Self {
            state_api: StateApi::new(config.state_base_url.clone()),
            worker_api: WorkerApi::new(config.worker_base_url.clone()),
            page_scraper,
            client,
            config,
            inner: Mutex::new(CoordinatorInner::default()),
        }
    }

    /// Drive the poll, evaluation, and stall-monitor loops until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: mpsc::Receiver<()>) {
        let mut monitor = tokio::time::interval(self.config.monitor_interval);
        monitor.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut evaluate = tokio::time::interval(Duration::from_secs(1));
        evaluate.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut next_poll = Instant::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_poll) => {
                    if let Err(error) = self.poll_once().await {
                        tracing::debug!(%error, "Pending poll failed");
                    }
                    next_poll = Instant::now() + self.poll_interval().await;
                }
                _ = monitor.tick() => self.monitor_downloads().await,
                _ = evaluate.tick() => self.evaluate_searches().await,
                _ = shutdown.recv() => {
                    tracing::info!("Coordinator shutting down");
                    break;
                }
            }
        }
    }

    /// Current adaptive interval: active 2 s, idle 10 s, sleep 30 s.
    pub async fn poll_interval(&self) -> Duration {
        let inner = self.inner.lock().await;
        if !inner.searches.is_empty() || !inner.downloads.is_empty() {
            return self.config.poll_active;
        }
        match inner.last_activity {
            Some(at) if at.elapsed() < self.config.idle_after => self.config.poll_active,
            Some(at) if at.elapsed() < self.config.sleep_after => self.config.poll_idle,
            Some(_) => self.config.poll_sleep,
            None => self.config.poll_idle,
        }
    }

    /// Fetch `/pending`, start a host search per new request, and mark each
    /// processed. Marking is at-least-once; the State Service applies it
    /// idempotently, so a failed mark is simply retried next poll.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let pending = self.state_api.pending().await?;

        for request in pending {
            let already_seen = {
                let inner = self.inner.lock().await;
                inner.seen_search_ids.contains(&request.search_id)
            };

            if !already_seen {
                match self.client.start_search(&request.query).await {
                    Ok(token) => {
                        tracing::info!(
                            search_id = request.search_id,
                            token,
                            query = %request.query,
                            "Search started"
                        );
                        let mut inner = self.inner.lock().await;
                        inner.seen_search_ids.insert(request.search_id);
                        inner.last_activity = Some(Instant::now());
                        inner.searches.insert(token, new_active_search(request.clone()));
                    }
                    Err(error) => {
                        tracing::warn!(search_id = request.search_id, %error, "Search failed to start");
                        continue;
                    }
                }
            }

            let mark = MarkProcessedRequest {
                timestamp: None,
                search_ids: Some(vec![request.search_id]),
            };
            if let Err(error) = self.state_api.mark_processed(&mark).await {
                tracing::warn!(search_id = request.search_id, %error, "Mark-processed failed, will retry");
            }
        }

        Ok(())
    }

    /// Host callback: one file result for a search token.
    pub async fn handle_search_result(&self, token: u32, file: SearchResultFile) {
        let mut inner = self.inner.lock().await;
        let Some(search) = inner.searches.get_mut(&token) else {
            return;
        };

        let score = scoring::score_candidate(&file, &search.target);
        let candidate = Candidate {
            file: file.clone(),
            score,
        };

        if let Some(album) = search.album.as_mut() {
            album
                .folder_results
                .entry((file.peer.clone(), file.folder().to_string()))
                .or_default()
                .push(candidate.clone());
        }
        scoring::insert_candidate(&mut search.candidates, candidate);
    }

    /// Apply the download triggers and the absolute search deadline.
    pub async fn evaluate_searches(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let tokens: Vec<u32> = inner.searches.keys().copied().collect();

        for token in tokens {
            let Some(search) = inner.searches.get(&token) else {
                continue;
            };
            let elapsed = search.started_at.elapsed();

            if elapsed > self.config.search_deadline {
                self.abandon_search(&mut inner, token, "timed out").await;
                continue;
            }
            if search.current_attempt >= 0 || !search.request.auto_download {
                continue;
            }

            if search.request.kind == SearchKind::Album {
                if elapsed >= self.config.late_trigger {
                    self.start_album_download(&mut inner, token).await;
                }
                continue;
            }

            let best = search.candidates.first().map(|c| c.score).unwrap_or(i64::MIN);
            let early_hit =
                elapsed >= self.config.early_trigger && best > self.config.early_score_threshold;
            let late_reached = elapsed >= self.config.late_trigger;

            if early_hit || (late_reached && best > self.config.late_score_threshold) {
                self.start_candidate(&mut inner, token, 0).await;
            } else if late_reached {
                self.abandon_search(&mut inner, token, "no suitable results").await;
            }
        }
    }

    /// Inspect every live transfer; a stalled or vanished one is aborted
    /// and the next candidate tried.
    pub async fn monitor_downloads(&self) {
        let mut inner = self.inner.lock().await;
        let paths: Vec<String> = inner.downloads.keys().cloned().collect();

        for path in paths {
            let snapshot = self.client.transfer_snapshot(&path).await;
            let Some(download) = inner.downloads.get_mut(&path) else {
                continue;
            };

            let stuck = match snapshot {
                Some(snapshot) => {
                    if snapshot.bytes_done > download.last_bytes {
                        download.last_bytes = snapshot.bytes_done;
                        download.last_change = Instant::now();
                        if let Some(track_id) = &download.track_id {
                            let total = if snapshot.bytes_total > 0 {
                                snapshot.bytes_total
                            } else {
                                download.size_bytes
                            };
                            let percent = if total > 0 {
                                (snapshot.bytes_done as f64 / total as f64 * 100.0).min(99.0)
                            } else {
                                0.0
                            };
                            self.state_api.update_progress_detached(
                                track_id,
                                &download.file_name,
                                percent,
                                snapshot.bytes_done,
                                total,
                            );
                        }
                    }
                    download.last_change.elapsed() > self.config.stall_grace
                }
                // The transfer disappeared from the client.
                None => true,
            };

            let deadline_passed = inner
                .downloads
                .get(&path)
                .and_then(|d| inner.searches.get(&d.token))
                .is_some_and(|s| s.started_at.elapsed() > self.config.search_deadline);

            if stuck || deadline_passed {
                self.handle_stuck_download(&mut inner, &path, deadline_passed).await;
            }
        }
    }

    async fn handle_stuck_download(
        &self,
        inner: &mut CoordinatorInner,
        path: &str,
        deadline_passed: bool,
    ) {
        let Some(download) = inner.downloads.remove(path) else {
            return;
        };
        let token = download.token;

        let peer = inner
            .searches
            .get(&token)
            .and_then(|s| s.candidates.iter().find(|c| c.file.virtual_path == path))
            .map(|c| c.file.peer.clone())
            .unwrap_or_default();
        if let Err(error) = self.client.abort_download(&peer, path).await {
            tracing::debug!(%error, path, "Abort failed");
        }

        self.state_api.emit_event_detached(
            EventType::Warning,
            format!("Download stalled: {}", download.file_name),
            download.track_id.clone(),
        );
        tracing::warn!(path, token, "Download stuck, aborted");

        let Some(search) = inner.searches.get(&token) else {
            return;
        };

        if deadline_passed || search.request.kind == SearchKind::Album {
            // Album files get no per-file fallback; the folder was chosen
            // as a whole. Past the deadline nothing is retried either.
            if inner.downloads.values().all(|d| d.token != token) {
                self.abandon_search(inner, token, "download window exhausted").await;
            }
            return;
        }

        let next_attempt = search.current_attempt + 1;
        self.start_candidate(inner, token, next_attempt).await;
    }

    /// Begin (or fall back to) the candidate at `attempt`; gives up after
    /// the candidate list or the attempt budget is exhausted.
    async fn start_candidate(&self, inner: &mut CoordinatorInner, token: u32, attempt: i32) {
        let mut attempt = attempt.max(0);

        loop {
            let Some(search) = inner.searches.get_mut(&token) else {
                return;
            };

            let index = attempt as usize;
            if index >= self.config.max_attempts || index >= search.candidates.len() {
                self.abandon_search(inner, token, "no viable candidates").await;
                return;
            }

            search.current_attempt = attempt;
            let candidate = search.candidates[index].clone();
            let track_id = if search.request.track_id.is_empty() {
                None
            } else {
                Some(search.request.track_id.clone())
            };
            let file_name = candidate.file.file_name().to_string();

            tracing::info!(
                token,
                attempt,
                score = candidate.score,
                file = %file_name,
                "Starting download"
            );
            self.state_api.emit_event_detached(
                EventType::Info,
                format!("Downloading: {file_name}"),
                track_id.clone(),
            );
            if let Some(track_id) = &track_id {
                self.state_api.update_progress_detached(
                    track_id,
                    &file_name,
                    0.0,
                    0,
                    candidate.file.size_bytes,
                );
            }

            if let Err(error) = self
                .client
                .enqueue_download(
                    &candidate.file.peer,
                    &candidate.file.virtual_path,
                    candidate.file.size_bytes,
                )
                .await
            {
                tracing::warn!(token, %error, "Enqueue failed, trying next candidate");
                attempt += 1;
                continue;
            }

            inner.last_activity = Some(Instant::now());
            inner.downloads.insert(
                candidate.file.virtual_path.clone(),
                ActiveDownload {
                    token,
                    track_id,
                    file_name,
                    size_bytes: candidate.file.size_bytes,
                    last_bytes: 0,
                    last_change: Instant::now(),
                },
            );
            return;
        }
    }

    /// Choose the folder with the highest aggregate score and download all
    /// of its audio files. Also kicks off the once-per-album folder
    /// creation and metadata prefetch.
    async fn start_album_download(self: &Arc<Self>, inner: &mut CoordinatorInner, token: u32) {
        let Some(search) = inner.searches.get_mut(&token) else {
            return;
        };
        let Some(album) = search.album.as_ref() else {
            return;
        };

        let best_folder = album
            .folder_results
            .iter()
            .max_by_key(|(_, files)| files.iter().map(|c| c.score.max(0)).sum::<i64>());
        let Some((_, files)) = best_folder else {
            self.abandon_search(inner, token, "no suitable results").await;
            return;
        };

        let files: Vec<Candidate> = files
            .iter()
            .filter(|c| matches!(c.file.extension().as_str(), "mp3" | "flac"))
            .cloned()
            .collect();
        if files.is_empty() {
            self.abandon_search(inner, token, "no audio files in best folder").await;
            return;
        }

        search.current_attempt = 0;
        search.expected_files = files.len();
        let request = search.request.clone();

        tracing::info!(token, files = files.len(), album = %request.album, "Album download starting");
        self.state_api.emit_event_detached(
            EventType::Info,
            format!(
                "Downloading album: {} - {} ({} files)",
                request.artist,
                request.album,
                files.len()
            ),
            None,
        );

        // Once-per-batch: create the target folder and prefetch album-level
        // metadata in the background so every track's enrichment can reuse it.
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.prepare_album(token, request).await;
        });

        for candidate in files {
            let matched = match_album_track(
                candidate.file.file_name(),
                &inner.searches[&token].request.tracks,
            );
            let track_id = matched
                .filter(|t| !t.track_id.is_empty())
                .map(|t| t.track_id.clone());
            let file_name = candidate.file.file_name().to_string();

            if let Err(error) = self
                .client
                .enqueue_download(
                    &candidate.file.peer,
                    &candidate.file.virtual_path,
                    candidate.file.size_bytes,
                )
                .await
            {
                tracing::warn!(file = %file_name, %error, "Album file enqueue failed");
                continue;
            }

            if let Some(track_id) = &track_id {
                self.state_api.update_progress_detached(
                    track_id,
                    &file_name,
                    0.0,
                    0,
                    candidate.file.size_bytes,
                );
            }
            inner.downloads.insert(
                candidate.file.virtual_path.clone(),
                ActiveDownload {
                    token,
                    track_id,
                    file_name,
                    size_bytes: candidate.file.size_bytes,
                    last_bytes: 0,
                    last_change: Instant::now(),
                },
            );
        }
        inner.last_activity = Some(Instant::now());
    }

    /// Ensure the album folder exists and scrape album-level metadata once.
    async fn prepare_album(&self, token: u32, request: SearchRequest) {
        let folder = self
            .worker_api
            .ensure_album_folder(&EnsureAlbumFolderRequest {
                album_artist: request.artist.clone(),
                album_name: request.album.clone(),
                year: request.year,
                download_dir: self.client.download_directory().display().to_string(),
            })
            .await;

        let prefetch = match request.tracks.iter().find(|t| !t.track_id.is_empty()) {
            Some(track) => self.page_scraper.scrape_track_page(&track.track_id).await,
            None => Default::default(),
        };

        let mut inner = self.inner.lock().await;
        let Some(search) = inner.searches.get_mut(&token) else {
            return;
        };
        let Some(album) = search.album.as_mut() else {
            return;
        };
        match folder {
            Ok(response) => album.folder_path = Some(response.folder_path),
            Err(error) => {
                tracing::warn!(%error, "Album folder creation failed");
            }
        }
        album.prefetched_year = prefetch.year.or(request.year);
        album.prefetched_image_url = prefetch.image_url;
    }

    /// Host callback: a transfer finished and landed at `local_path`.
    pub async fn handle_download_complete(&self, virtual_path: &str, local_path: &Path) {
        let mut inner = self.inner.lock().await;
        let Some(download) = inner.downloads.remove(virtual_path) else {
            return;
        };
        let token = download.token;
        inner.last_activity = Some(Instant::now());

        let Some(search) = inner.searches.get_mut(&token) else {
            return;
        };
        search.completed_files += 1;
        let finished = search.completed_files >= search.expected_files;

        if let Some(track_id) = &download.track_id {
            self.state_api.update_progress_detached(
                track_id,
                &download.file_name,
                100.0,
                download.size_bytes,
                download.size_bytes,
            );
        }

        let metadata_request = build_metadata_request(search, &download, local_path);
        let worker_api = self.worker_api.clone();
        let state_api = self.state_api.clone();
        let display = search.display_name();
        tokio::spawn(async move {
            let track_id = (!metadata_request.track_id.is_empty())
                .then(|| metadata_request.track_id.clone());
            match worker_api.process_metadata(&metadata_request).await {
                Ok(response) => {
                    tracing::info!(new_path = %response.new_path, "Metadata processing acked");
                }
                Err(error) => {
                    tracing::warn!(%error, "Metadata processing failed");
                    state_api.emit_event_detached(
                        EventType::Error,
                        format!("Failed: {display} (metadata processing unavailable)"),
                        track_id,
                    );
                }
            }
        });

        if finished {
            tracing::info!(token, "Search complete");
            inner.searches.remove(&token);
        }
    }

    async fn abandon_search(&self, inner: &mut CoordinatorInner, token: u32, reason: &str) {
        let Some(search) = inner.searches.remove(&token) else {
            return;
        };
        let stale: Vec<String> = inner
            .downloads
            .iter()
            .filter(|(_, d)| d.token == token)
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            inner.downloads.remove(&path);
        }

        let track_id = if search.request.track_id.is_empty() {
            None
        } else {
            Some(search.request.track_id.clone())
        };
        tracing::warn!(token, reason, "Search abandoned");
        self.state_api.emit_event_detached(
            EventType::Error,
            format!("Failed: {} ({reason})", search.display_name()),
            track_id,
        );
    }

    /// Test/introspection helpers.
    pub async fn active_search_count(&self) -> usize {
        self.inner.lock().await.searches.len()
    }

    pub async fn active_download_count(&self) -> usize {
        self.inner.lock().await.downloads.len()
    }
}

fn new_active_search(request: SearchRequest) -> ActiveSearch {
    let target = ScoreTarget {
        artist: request.artist.clone(),
        track: request.track.clone(),
        query: request.query.clone(),
        duration_seconds: request.duration_seconds,
        format_preference: request.format_preference,
    };
    let album = (request.kind == SearchKind::Album).then(AlbumState::default);
    ActiveSearch {
        target,
        candidates: Vec::new(),
        current_attempt: -1,
        started_at: Instant::now(),
        expected_files: 1,
        completed_files: 0,
        album,
        request,
    }
}

/// Match a downloaded file back to an album track by word overlap with the
/// track title.
fn match_album_track<'a>(file_name: &str, tracks: &'a [AlbumTrack]) -> Option<&'a AlbumTrack> {
    let haystack = sanitize(file_name).to_lowercase();
    tracks
        .iter()
        .map(|track| {
            let title = sanitize(&track.track).to_lowercase();
            let words: Vec<&str> = title.split_whitespace().collect();
            let matched = words.iter().filter(|w| haystack.contains(**w)).count();
            let ratio = if words.is_empty() {
                0.0
            } else {
                matched as f64 / words.len() as f64
            };
            (track, ratio)
        })
        .filter(|(_, ratio)| *ratio >= 0.5)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(track, _)| track)
}

fn build_metadata_request(
    search: &ActiveSearch,
    download: &ActiveDownload,
    local_path: &Path,
) -> ProcessMetadataRequest {
    match &search.album {
        Some(album) => {
            let matched = match_album_track(&download.file_name, &search.request.tracks);
            ProcessMetadataRequest {
                file_path: local_path.display().to_string(),
                artist: matched
                    .map(|t| t.artist.clone())
                    .filter(|a| !a.is_empty())
                    .unwrap_or_else(|| search.request.artist.clone()),
                track: matched
                    .map(|t| t.track.clone())
                    .unwrap_or_else(|| download.file_name.clone()),
                album: search.request.album.clone(),
                track_id: matched.map(|t| t.track_id.clone()).unwrap_or_default(),
                track_number: matched.map(|t| t.track_number).unwrap_or(0),
                prefetched_year: album.prefetched_year.or(search.request.year),
                prefetched_image_url: album.prefetched_image_url.clone(),
                target_folder: album.folder_path.clone(),
                format_preference: Some(search.request.format_preference),
            }
        }
        None => ProcessMetadataRequest {
            file_path: local_path.display().to_string(),
            artist: search.request.artist.clone(),
            track: search.request.track.clone(),
            album: search.request.album.clone(),
            track_id: search.request.track_id.clone(),
            track_number: 0,
            prefetched_year: None,
            prefetched_image_url: None,
            target_folder: None,
            format_preference: Some(search.request.format_preference),
        },
    }
}
