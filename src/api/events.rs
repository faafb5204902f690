//! Consumer-side event ingestion with restart detection.

use crate::models::Event;

/// Below this ceiling, an id regression is read as a server restart rather
/// than reordering. Kept for wire compatibility with the legacy consumer.
const RESTART_ID_CEILING: u64 = 10;

/// High-water-mark cursor over the `/status` event stream.
///
/// The State Service resets event ids to zero when it restarts. A consumer
/// holding `last_event_id` detects the regression two ways: the startup
/// nonce published in `/status` (authoritative), or the legacy heuristic
/// `max(id) < last_event_id && max(id) < 10`.
#[derive(Debug, Default)]
pub struct EventCursor {
    last_event_id: u64,
    last_nonce: Option<u64>,
}

impl EventCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_event_id(&self) -> u64 {
        self.last_event_id
    }

    /// Ingest a `/status` snapshot; returns the events not yet seen, in
    /// order, after applying restart detection.
    pub fn ingest(&mut self, events: &[Event], startup_nonce: Option<u64>) -> Vec<Event> {
        if let Some(nonce) = startup_nonce {
            if self.last_nonce.is_some_and(|last| last != nonce) {
                self.last_event_id = 0;
            }
            self.last_nonce = Some(nonce);
        }

        let Some(max_id) = events.iter().map(|e| e.id).max() else {
            return Vec::new();
        };

        if max_id < self.last_event_id && max_id < RESTART_ID_CEILING {
            self.last_event_id = 0;
        }

        let fresh: Vec<Event> = events
            .iter()
            .filter(|e| e.id > self.last_event_id)
            .cloned()
            .collect();
        if let Some(last) = fresh.last() {
            self.last_event_id = last.id;
        }
        fresh
    }
}
