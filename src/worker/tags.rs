//! Format-aware tag writer: ID3v2 for MP3, Vorbis comments plus a picture
//! block for FLAC.
//!
//! A fresh tag replaces whatever the file carried, so peer-supplied
//! comments, ratings, and lyrics are discarded along the way.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{Accessor, TagExt};
use lofty::tag::{ItemKey, Tag, TagType};

/// Files below this are not real audio; leave them alone.
const MIN_FILE_BYTES: u64 = 1024;
/// Files above this are left untagged.
const MAX_FILE_BYTES: u64 = 500 * 1024 * 1024;
/// Covers above this are omitted; other tags still write.
const MAX_COVER_BYTES: usize = 10 * 1024 * 1024;
/// The write is abandoned past this deadline and reported as a failure.
const TAG_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the writer may stamp onto a file. Optional fields are simply
/// skipped when the metadata resolution could not supply them.
#[derive(Debug, Clone, Default)]
pub struct TagData {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub genre: Option<String>,
    pub label: Option<String>,
    pub cover: Option<Vec<u8>>,
}

/// Outcome reported back through the pipeline's terminal event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagOutcome {
    pub tags_updated: bool,
    pub cover_embedded: bool,
}

/// Write tags appropriate to the file's extension. Never errors: every
/// failure mode collapses into the outcome flags.
pub async fn write_tags(path: &Path, data: TagData) -> TagOutcome {
    let tag_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("mp3") => TagType::Id3v2,
        Some("flac") => TagType::VorbisComments,
        other => {
            tracing::warn!(path = %path.display(), extension = ?other, "Unsupported format for tagging");
            return TagOutcome::default();
        }
    };

    let size = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "File missing at tag time");
            return TagOutcome::default();
        }
    };
    if size < MIN_FILE_BYTES {
        tracing::warn!(path = %path.display(), size, "File too small to tag");
        return TagOutcome::default();
    }
    if size > MAX_FILE_BYTES {
        tracing::warn!(path = %path.display(), size, "File too large to tag");
        return TagOutcome::default();
    }

    let path_buf: PathBuf = path.to_path_buf();
    let write = tokio::task::spawn_blocking(move || write_tags_blocking(&path_buf, tag_type, data));

    match tokio::time::timeout(TAG_WRITE_TIMEOUT, write).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) => {
            tracing::error!(path = %path.display(), %join_error, "Tag write task panicked");
            TagOutcome::default()
        }
        Err(_) => {
            tracing::warn!(path = %path.display(), "Tag write timed out, abandoned");
            TagOutcome::default()
        }
    }
}

fn write_tags_blocking(path: &Path, tag_type: TagType, data: TagData) -> TagOutcome {
    let mut tag = Tag::new(tag_type);
    tag.set_title(data.title.clone());
    tag.set_artist(data.artist.clone());
    tag.set_album(data.album.clone());
    if let Some(year) = data.year {
        tag.set_year(year);
    }
    if let Some(track_number) = data.track_number.filter(|n| *n > 0) {
        tag.set_track(track_number);
    }
    if let Some(genre) = data.genre.clone() {
        tag.set_genre(genre);
    }
    if let Some(label) = data.label.clone() {
        tag.insert_text(ItemKey::Label, label);
    }

    let mut cover_embedded = false;
    match data.cover {
        Some(cover) if cover.len() <= MAX_COVER_BYTES => {
            let picture = Picture::new_unchecked(
                PictureType::CoverFront,
                Some(MimeType::Jpeg),
                None,
                cover,
            );
            tag.push_picture(picture);
            cover_embedded = true;
        }
        Some(cover) => {
            tracing::warn!(path = %path.display(), size = cover.len(), "Cover too large, omitted");
        }
        None => {}
    }

    match tag.save_to_path(path, WriteOptions::default()) {
        Ok(()) => TagOutcome {
            tags_updated: true,
            cover_embedded,
        },
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "Tag write failed");
            TagOutcome::default()
        }
    }
}
