//! Core data model: search requests, events, progress entries, and the
//! persisted settings documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a queued search request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Track,
    Album,
}

/// Preferred download format. Reorders candidates, never eliminates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatPreference {
    #[default]
    Mp3,
    Flac,
}

/// One track of an album request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumTrack {
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub track_id: String,
    #[serde(default, alias = "duration")]
    pub duration_seconds: u32,
}

/// A unit of work accepted by the State Service and consumed by the plugin.
///
/// Once `processed` is true no field mutates; processed entries are purged
/// an hour after their timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub search_id: u64,
    #[serde(alias = "type")]
    pub kind: SearchKind,
    #[serde(default, alias = "query_string")]
    pub query: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub track_id: String,
    #[serde(default, alias = "duration")]
    pub duration_seconds: u32,
    #[serde(default)]
    pub format_preference: FormatPreference,
    #[serde(default = "default_true")]
    pub auto_download: bool,
    #[serde(default = "default_true")]
    pub metadata_override: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<AlbumTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
}

fn default_true() -> bool {
    true
}

/// Incoming body of `POST /search` (single track).
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSubmission {
    #[serde(default, alias = "query_string")]
    pub query: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub track_id: String,
    #[serde(default, alias = "duration")]
    pub duration_seconds: u32,
    pub format_preference: Option<FormatPreference>,
    pub auto_download: Option<bool>,
    pub metadata_override: Option<bool>,
}

/// Incoming body of `POST /search-album`.
///
/// The legacy browser sends `type:"album"`, newer builds send
/// `kind:"album"`; both are accepted and neither is required.
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumSubmission {
    pub album_artist: String,
    pub album_name: String,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub tracks: Vec<AlbumTrack>,
    #[serde(default, alias = "type")]
    pub kind: Option<SearchKind>,
    pub format_preference: Option<FormatPreference>,
    pub auto_download: Option<bool>,
    pub metadata_override: Option<bool>,
}

/// Body of `POST /mark-processed`: match by timestamp or by id set.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkProcessedRequest {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub search_ids: Option<Vec<u64>>,
}

/// Console event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Info,
    Success,
    Warning,
    Error,
}

/// Element of the bounded event log. `id` is strictly increasing within one
/// State Service process lifetime and resets to zero on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
}

/// Body of `POST /event`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventSubmission {
    #[serde(rename = "type", alias = "kind")]
    pub kind: EventType,
    pub message: String,
    #[serde(default)]
    pub track_id: Option<String>,
}

/// Value of the progress table, keyed by `track_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub filename: String,
    pub percent: f64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub last_update: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Body of `POST /progress`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressUpdate {
    pub track_id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub bytes_done: u64,
    #[serde(default)]
    pub bytes_total: u64,
}

/// Rename templates, re-sent by the browser on every connect.
///
/// Tokens: `{artist}`, `{track}`, `{album}`, `{year}`, `{trackNum}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenamePatterns {
    pub single_track: String,
    pub album_track: String,
}

impl Default for RenamePatterns {
    fn default() -> Self {
        Self {
            single_track: "{artist} - {track}".to_string(),
            album_track: "{trackNum} {artist} - {track}".to_string(),
        }
    }
}

/// Spotify API credentials. Serialized camelCase to match the on-disk
/// document; the HTTP body's snake_case spellings are accepted as aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyCredentials {
    #[serde(rename = "clientId", alias = "client_id", default)]
    pub client_id: String,
    #[serde(rename = "clientSecret", alias = "client_secret", default)]
    pub client_secret: String,
}

impl SpotifyCredentials {
    pub fn is_present(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

/// Persisted debug toggles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DebugSettings {
    #[serde(rename = "debugWindows", alias = "debug_windows", default)]
    pub debug_windows: bool,
}

// ---------------------------------------------------------------------------
// Worker Service wire contract
// ---------------------------------------------------------------------------

/// Body of `POST /process-metadata` on the Worker Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetadataRequest {
    pub file_path: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub track_id: String,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetched_year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetched_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_preference: Option<FormatPreference>,
}

/// Foreground reply of `/process-metadata`, sent after rename+move but
/// before any network work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetadataResponse {
    pub success: bool,
    pub new_path: String,
    pub renamed: bool,
    pub moved_to_folder: bool,
}

/// Body of `POST /ensure-album-folder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureAlbumFolderRequest {
    pub album_artist: String,
    pub album_name: String,
    #[serde(default)]
    pub year: Option<u32>,
    pub download_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsureAlbumFolderResponse {
    pub folder_path: String,
    pub folder_name: String,
}

/// Body of `POST /organize-album`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeAlbumRequest {
    pub track_paths: Vec<String>,
    pub artist: String,
    pub album: String,
    #[serde(default)]
    pub year: Option<u32>,
}

/// Per-track outcome of `/organize-album`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeTrackResult {
    pub track_path: String,
    pub moved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizeAlbumResponse {
    pub folder_path: String,
    pub results: Vec<OrganizeTrackResult>,
}
