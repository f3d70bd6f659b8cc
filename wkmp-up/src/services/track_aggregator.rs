//! Per-session collection of processed tracks
//!
//! Workers record results in completion order; finalize reads them back in
//! registration order by file id.

use crate::models::{ProcessedTrack, Track};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct TrackAggregator {
    tracks: Mutex<HashMap<Uuid, HashMap<Uuid, Track>>>,
}

impl TrackAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_id: Uuid, processed: ProcessedTrack) {
        self.tracks
            .lock()
            .entry(session_id)
            .or_default()
            .insert(processed.file_id, processed.track);
    }

    /// Copy of everything recorded for a session (empty when nothing was)
    pub fn snapshot(&self, session_id: Uuid) -> HashMap<Uuid, Track> {
        self.tracks
            .lock()
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, session_id: Uuid) -> usize {
        self.tracks.lock().get(&session_id).map_or(0, HashMap::len)
    }

    pub fn clear(&self, session_id: Uuid) {
        self.tracks.lock().remove(&session_id);
    }
}
