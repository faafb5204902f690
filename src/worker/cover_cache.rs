//! Bounded LRU cache for downloaded cover art, keyed by image URL.
//!
//! Two-dimensional bound: aggregate size stays under 50 MB and entries
//! expire five minutes after their last touch. An album batch hits this
//! cache so the image is downloaded at most once per album.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Aggregate cap across all entries.
const MAX_CACHE_BYTES: usize = 50 * 1024 * 1024;
/// Per-entry time-to-live.
const ENTRY_TTL_SECS: i64 = 300;

struct CacheEntry {
    buffer: Arc<Vec<u8>>,
    touched_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
}

/// Byte-capped, TTL-bounded LRU. Recency is tracked by touch timestamp.
pub struct CoverArtCache {
    state: Mutex<CacheState>,
    capacity: usize,
}

impl Default for CoverArtCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CoverArtCache {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CACHE_BYTES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity,
        }
    }

    /// Fetch a cached image, refreshing its LRU position. Expired entries
    /// are dropped and reported as misses.
    pub fn get(&self, url: &str, now: DateTime<Utc>) -> Option<Arc<Vec<u8>>> {
        let mut state = self.state.lock().expect("cover cache poisoned");

        let expired = state
            .entries
            .get(url)
            .is_some_and(|e| now - e.touched_at > Duration::seconds(ENTRY_TTL_SECS));
        if expired {
            if let Some(entry) = state.entries.remove(url) {
                state.total_bytes -= entry.buffer.len();
            }
            return None;
        }

        let entry = state.entries.get_mut(url)?;
        entry.touched_at = now;
        Some(Arc::clone(&entry.buffer))
    }

    /// Insert an image, evicting least-recently-touched entries until it
    /// fits. Buffers larger than the whole cache are rejected outright.
    pub fn put(&self, url: &str, buffer: Vec<u8>, now: DateTime<Utc>) {
        if buffer.len() > self.capacity {
            tracing::warn!(url, size = buffer.len(), "Cover art too large to cache");
            return;
        }

        let mut state = self.state.lock().expect("cover cache poisoned");

        if let Some(previous) = state.entries.remove(url) {
            state.total_bytes -= previous.buffer.len();
        }

        while state.total_bytes + buffer.len() > self.capacity {
            let Some(oldest_key) = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(evicted) = state.entries.remove(&oldest_key) {
                state.total_bytes -= evicted.buffer.len();
            }
        }

        state.total_bytes += buffer.len();
        state.entries.insert(
            url.to_string(),
            CacheEntry {
                buffer: Arc::new(buffer),
                touched_at: now,
            },
        );
    }

    /// Drop expired entries; returns how many were removed.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock().expect("cover cache poisoned");
        let before = state.entries.len();
        let cutoff = now - Duration::seconds(ENTRY_TTL_SECS);
        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.touched_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = state.entries.remove(&key) {
                state.total_bytes -= entry.buffer.len();
            }
        }
        before - state.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().expect("cover cache poisoned").total_bytes
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("cover cache poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
