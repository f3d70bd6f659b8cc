//! Chapter assembly for playlist updates
//!
//! Pure helper for PlaylistUpdater implementations: given the chapter keys a
//! card already has, build the chapters that append a session's tracks.

use crate::models::{Track, UploadMode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Title of the single chapter created in `tracks` mode
pub const NEW_UPLOADS_TITLE: &str = "New Uploads";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub key: String,
    pub title: String,
    pub tracks: Vec<Track>,
}

/// Lowest numeric keys not already taken, in ascending order
fn free_keys<'a>(existing: impl IntoIterator<Item = &'a str>) -> impl Iterator<Item = String> {
    let taken: HashSet<String> = existing.into_iter().map(str::to_string).collect();
    (0u64..).map(|k| k.to_string()).filter(move |k| !taken.contains(k))
}

/// Build the chapters to append for `tracks` (already in final order)
///
/// - `chapters` mode: one chapter per track, titled after it, using the lowest
///   unused numeric chapter keys. Track keys follow upload position.
/// - `tracks` mode: a single "New Uploads" chapter under the lowest unused key,
///   holding every track with keys 0..n.
///
/// Returns nothing for an empty track list.
pub fn assemble_chapters<'a>(
    existing_keys: impl IntoIterator<Item = &'a str>,
    mode: UploadMode,
    tracks: &[Track],
) -> Vec<Chapter> {
    if tracks.is_empty() {
        return Vec::new();
    }

    let keyed = tracks.iter().enumerate().map(|(i, track)| Track {
        key: i.to_string(),
        ..track.clone()
    });
    let mut keys = free_keys(existing_keys);

    match mode {
        UploadMode::Chapters => keyed
            .zip(&mut keys)
            .map(|(track, key)| Chapter {
                key,
                title: track.title.clone(),
                tracks: vec![track],
            })
            .collect(),
        UploadMode::Tracks => keys
            .next()
            .map(|key| Chapter {
                key,
                title: NEW_UPLOADS_TITLE.to_string(),
                tracks: keyed.collect(),
            })
            .into_iter()
            .collect(),
    }
}
