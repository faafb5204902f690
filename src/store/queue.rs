//! Persistent search-request queue.
//!
//! A single JSON document `{ "searches": [...] }` is the whole store. Every
//! operation read-modify-writes the file under a process-local mutex; the
//! State Service is the sole mutator, so no cross-process locking exists.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::models::{MarkProcessedRequest, SearchRequest};

/// Processed entries older than this are purged by `cleanup`.
const PROCESSED_RETENTION: Duration = Duration::hours(1);

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    searches: Vec<SearchRequest>,
}

/// File-backed queue of search requests.
pub struct QueueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(error) = std::fs::create_dir_all(parent) {
                    tracing::warn!(dir = %parent.display(), %error, "Failed to create queue directory");
                }
            }
        }
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Append a request, assigning the next monotonic `search_id`.
    pub async fn append(&self, mut request: SearchRequest) -> Result<SearchRequest> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await;

        let next_id = document
            .searches
            .iter()
            .map(|s| s.search_id)
            .max()
            .unwrap_or(0)
            + 1;
        request.search_id = next_id;
        request.processed = false;
        document.searches.push(request.clone());

        self.save(&document).await?;
        Ok(request)
    }

    /// Pending entries in insertion order.
    pub async fn list_unprocessed(&self) -> Vec<SearchRequest> {
        let _guard = self.lock.lock().await;
        self.load()
            .await
            .searches
            .into_iter()
            .filter(|s| !s.processed)
            .collect()
    }

    /// Set `processed = true` on every matching entry. Idempotent; returns
    /// the number of entries that actually flipped.
    pub async fn mark_processed(&self, request: &MarkProcessedRequest) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await;

        let mut flipped = 0;
        for search in &mut document.searches {
            if search.processed {
                continue;
            }
            let matches = match (&request.timestamp, &request.search_ids) {
                (Some(timestamp), _) => search.timestamp == *timestamp,
                (None, Some(ids)) => ids.contains(&search.search_id),
                (None, None) => false,
            };
            if matches {
                search.processed = true;
                flipped += 1;
            }
        }

        if flipped > 0 {
            self.save(&document).await?;
        }
        Ok(flipped)
    }

    /// Drop processed entries older than one hour. Unprocessed entries are
    /// retained indefinitely.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut document = self.load().await;

        let before = document.searches.len();
        document
            .searches
            .retain(|s| !(s.processed && now - s.timestamp > PROCESSED_RETENTION));
        let removed = before - document.searches.len();

        if removed > 0 {
            self.save(&document).await?;
        }
        Ok(removed)
    }

    /// Parse the queue document. A legacy top-level array is accepted as the
    /// `searches` list; an unreadable file degrades to an empty queue.
    async fn load(&self) -> QueueDocument {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return QueueDocument::default();
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "Failed to read queue file");
                return QueueDocument::default();
            }
        };

        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(serde_json::Value::Array(items)) => {
                parse_searches(serde_json::Value::Array(items))
            }
            Ok(serde_json::Value::Object(mut map)) => match map.remove("searches") {
                Some(value) => parse_searches(value),
                None => QueueDocument::default(),
            },
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "Queue file is not valid JSON, starting empty");
                QueueDocument::default()
            }
        }
    }

    async fn save(&self, document: &QueueDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)?;
        write_atomic(&self.path, json).await
    }
}

fn parse_searches(value: serde_json::Value) -> QueueDocument {
    match serde_json::from_value::<Vec<SearchRequest>>(value) {
        Ok(searches) => QueueDocument { searches },
        Err(error) => {
            tracing::warn!(%error, "Queue entries failed to parse, starting empty");
            QueueDocument::default()
        }
    }
}

/// Write via temp file + rename so readers never observe a torn document.
pub(crate) async fn write_atomic(path: &Path, contents: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("creating temp file in {}", parent.display()))?;
        temp.write_all(&contents)
            .context("writing temp queue document")?;
        temp.persist(&path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    })
    .await
    .context("atomic write task panicked")?
}
