//! Concurrent table of in-flight download progress.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::{ProgressEntry, ProgressUpdate};

/// Completed entries linger this long so the UI can show 100%.
const COMPLETED_RETENTION_SECS: i64 = 60;
/// Incomplete entries without updates are considered abandoned after this.
const STALE_RETENTION_SECS: i64 = 600;

/// Map of `track_id` to progress, owned exclusively by the State Service.
#[derive(Default)]
pub struct ProgressTable {
    entries: DashMap<String, ProgressEntry>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-mutate. Percent is monotone non-decreasing while the entry
    /// is live; `completed_at` is set exactly once, on the first transition
    /// to 100.
    pub fn update(&self, update: &ProgressUpdate, now: DateTime<Utc>) {
        let mut entry = self
            .entries
            .entry(update.track_id.clone())
            .or_insert_with(|| ProgressEntry {
                filename: update.filename.clone(),
                percent: 0.0,
                bytes_done: 0,
                bytes_total: 0,
                last_update: now,
                completed_at: None,
            });

        if !update.filename.is_empty() {
            entry.filename = update.filename.clone();
        }
        entry.percent = entry.percent.max(update.percent.clamp(0.0, 100.0));
        entry.bytes_done = entry.bytes_done.max(update.bytes_done);
        if update.bytes_total > 0 {
            entry.bytes_total = update.bytes_total;
        }
        entry.last_update = now;
        if entry.percent >= 100.0 && entry.completed_at.is_none() {
            entry.completed_at = Some(now);
        }
    }

    /// Remove an entry; idempotent.
    pub fn remove(&self, track_id: &str) -> bool {
        self.entries.remove(track_id).is_some()
    }

    /// Clear the table, returning the prior size.
    pub fn clear(&self) -> usize {
        let size = self.entries.len();
        self.entries.clear();
        size
    }

    /// Evict entries 60s after completion, or 10min after the last update
    /// when incomplete. Returns how many were dropped.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.completed_at {
            Some(completed_at) => now - completed_at <= Duration::seconds(COMPLETED_RETENTION_SECS),
            None => now - entry.last_update <= Duration::seconds(STALE_RETENTION_SECS),
        });
        before - self.entries.len()
    }

    /// Snapshot for `/status`.
    pub fn snapshot(&self) -> HashMap<String, ProgressEntry> {
        self.entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(track_id: &str, percent: f64, bytes_done: u64) -> ProgressUpdate {
        ProgressUpdate {
            track_id: track_id.to_string(),
            filename: "song.mp3".to_string(),
            percent,
            bytes_done,
            bytes_total: 1000,
        }
    }

    #[test]
    fn percent_is_monotone_non_decreasing() {
        let table = ProgressTable::new();
        let now = Utc::now();
        table.update(&update("t1", 40.0, 400), now);
        table.update(&update("t1", 20.0, 200), now);

        let snapshot = table.snapshot();
        assert_eq!(snapshot["t1"].percent, 40.0);
    }

    #[test]
    fn completed_at_is_set_exactly_once() {
        let table = ProgressTable::new();
        let first = Utc::now();
        table.update(&update("t1", 100.0, 1000), first);
        let completed_at = table.snapshot()["t1"].completed_at.unwrap();

        let later = first + Duration::seconds(5);
        table.update(&update("t1", 100.0, 1000), later);
        assert_eq!(table.snapshot()["t1"].completed_at.unwrap(), completed_at);
    }

    #[test]
    fn remove_is_idempotent() {
        let table = ProgressTable::new();
        table.update(&update("t1", 10.0, 100), Utc::now());
        assert!(table.remove("t1"));
        assert!(!table.remove("t1"));
    }

    #[test]
    fn cleanup_evicts_completed_after_a_minute() {
        let table = ProgressTable::new();
        let now = Utc::now();
        table.update(&update("done", 100.0, 1000), now);
        table.update(&update("live", 50.0, 500), now);

        assert_eq!(table.cleanup(now + Duration::seconds(61)), 1);
        assert!(table.snapshot().contains_key("live"));
    }

    #[test]
    fn cleanup_evicts_stale_incomplete_after_ten_minutes() {
        let table = ProgressTable::new();
        let now = Utc::now();
        table.update(&update("stale", 50.0, 500), now);

        assert_eq!(table.cleanup(now + Duration::seconds(599)), 0);
        assert_eq!(table.cleanup(now + Duration::seconds(601)), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn clear_returns_prior_size() {
        let table = ProgressTable::new();
        let now = Utc::now();
        table.update(&update("a", 10.0, 100), now);
        table.update(&update("b", 20.0, 200), now);
        assert_eq!(table.clear(), 2);
        assert!(table.is_empty());
    }
}
