//! Track results and queue work items

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Track metadata produced by the analysis/upload collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Display title
    pub title: String,
    /// Track key within its chapter (assigned at playlist assembly)
    pub key: String,
    /// Remote reference to the transcoded audio
    pub track_url: String,
    /// Audio format reported by the remote transcoder
    pub format: Option<String>,
    /// Duration in seconds, if known
    pub duration_seconds: Option<f64>,
}

/// A successfully processed file and the track it produced
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTrack {
    pub file_id: Uuid,
    pub track: Track,
}

/// Atomic unit placed on the work queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub session_id: Uuid,
    pub file_id: Uuid,
    pub playlist_id: String,
}

/// Everything the analysis/upload collaborator needs to know about a file
#[derive(Debug, Clone)]
pub struct TrackSource {
    pub session_id: Uuid,
    pub file_id: Uuid,
    /// Original filename as uploaded
    pub filename: String,
    /// Current on-disk location (normalized copy if normalization ran)
    pub path: PathBuf,
    /// Resolved title (custom > original > filename stem)
    pub title: String,
    pub size_bytes: u64,
}
