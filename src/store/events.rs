//! Bounded in-memory console event log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::models::{Event, EventType};

/// Maximum retained events.
const EVENT_CAP: usize = 50;
/// Events older than this are evicted.
const EVENT_TTL_SECS: i64 = 3600;

/// Ring of recent events with a monotone id counter.
///
/// Ids restart at zero with the process; consumers detect the regression
/// and reset their high-water mark (see `api::events`).
pub struct EventLog {
    entries: Mutex<VecDeque<Event>>,
    next_id: AtomicU64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(EVENT_CAP)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Append an event, trimming the head past the cap and opportunistically
    /// expiring stale entries.
    pub fn add(&self, kind: EventType, message: impl Into<String>, track_id: Option<String>) -> Event {
        let event = Event {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
            track_id,
        };

        let mut entries = self.entries.lock().expect("event log poisoned");
        entries.push_back(event.clone());
        while entries.len() > EVENT_CAP {
            entries.pop_front();
        }
        let cutoff = Utc::now() - Duration::seconds(EVENT_TTL_SECS);
        while entries.front().is_some_and(|e| e.timestamp < cutoff) {
            entries.pop_front();
        }

        event
    }

    /// Events with `id > last_id`, in insertion order.
    pub fn since(&self, last_id: u64) -> Vec<Event> {
        let entries = self.entries.lock().expect("event log poisoned");
        entries.iter().filter(|e| e.id > last_id).cloned().collect()
    }

    /// All retained events in insertion order.
    pub fn all(&self) -> Vec<Event> {
        self.since(0)
    }

    /// Evict entries older than the TTL; returns how many were dropped.
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(EVENT_TTL_SECS);
        let mut entries = self.entries.lock().expect("event log poisoned");
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("event log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total events emitted over the process lifetime.
    pub fn emitted(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}
