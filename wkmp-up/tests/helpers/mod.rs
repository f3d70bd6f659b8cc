//! Scripted collaborators for upload processor integration tests
//!
//! Behaviour is keyed by filename so a test can say "this file takes 30s" or
//! "this file fails" without touching real audio or a remote service.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wkmp_up::{
    AudioNormalizer, Collaborators, FileProgress, PlaylistUpdateOutcome, PlaylistUpdater,
    ProcessorConfig, Track, TrackSource, TrackUploader, UploadMode, UploadProcessor,
};

/// Per-file script for the uploader
#[derive(Debug, Clone, Default)]
pub struct FileScript {
    pub delay: Duration,
    pub fail: Option<String>,
    pub panic: bool,
}

#[derive(Default)]
pub struct ScriptedUploader {
    scripts: Mutex<HashMap<String, FileScript>>,
    calls: AtomicUsize,
    /// Filenames in the order their upload finished
    completed: Mutex<Vec<String>>,
    /// Paths the uploader was handed, by filename
    seen_paths: Mutex<HashMap<String, PathBuf>>,
}

impl ScriptedUploader {
    pub fn script(&self, filename: &str, script: FileScript) {
        self.scripts.lock().insert(filename.to_string(), script);
    }

    pub fn delay(&self, filename: &str, delay: Duration) {
        self.script(filename, FileScript { delay, ..Default::default() });
    }

    pub fn fail(&self, filename: &str, message: &str) {
        self.script(
            filename,
            FileScript {
                fail: Some(message.to_string()),
                ..Default::default()
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }

    pub fn seen_path(&self, filename: &str) -> Option<PathBuf> {
        self.seen_paths.lock().get(filename).cloned()
    }
}

#[async_trait]
impl TrackUploader for ScriptedUploader {
    async fn analyze_and_upload(
        &self,
        source: &TrackSource,
        progress: &FileProgress,
    ) -> anyhow::Result<Track> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_paths
            .lock()
            .insert(source.filename.clone(), source.path.clone());
        let script = self
            .scripts
            .lock()
            .get(&source.filename)
            .cloned()
            .unwrap_or_default();

        progress.report(0.5);
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if script.panic {
            panic!("uploader crashed on {}", source.filename);
        }
        if let Some(message) = script.fail {
            anyhow::bail!(message);
        }

        progress.uploading();
        progress.report(1.0);
        self.completed.lock().push(source.filename.clone());

        Ok(Track {
            title: "uploader title".to_string(),
            key: String::new(),
            track_url: format!("remote://{}", source.filename),
            format: Some("opus".to_string()),
            duration_seconds: Some(120.0),
        })
    }
}

/// Normalizer that writes nothing and reports `<stem>.norm.<ext>` outputs
#[derive(Default)]
pub struct ScriptedNormalizer {
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
    fail_with: Mutex<Option<String>>,
    panic: AtomicBool,
    delay: Mutex<Duration>,
    /// Input count of every batch call
    batch_sizes: Mutex<Vec<usize>>,
}

impl ScriptedNormalizer {
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock() = Some(message.to_string());
    }

    pub fn panic_on_call(&self) {
        self.panic.store(true, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }
}

#[async_trait]
impl AudioNormalizer for ScriptedNormalizer {
    async fn normalize(
        &self,
        inputs: &[PathBuf],
        batch: bool,
        _target_lufs: f64,
    ) -> anyhow::Result<Vec<PathBuf>> {
        if batch {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().push(inputs.len());
        } else {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panic.load(Ordering::SeqCst) {
            panic!("normalizer crashed on {} inputs", inputs.len());
        }
        if let Some(message) = self.fail_with.lock().clone() {
            anyhow::bail!(message);
        }
        Ok(inputs.iter().map(|p| p.with_extension("norm.mp3")).collect())
    }
}

/// One recorded playlist update
#[derive(Debug, Clone)]
pub struct PlaylistCall {
    pub playlist_id: String,
    pub mode: UploadMode,
    pub tracks: Vec<Track>,
}

#[derive(Default)]
pub struct RecordingPlaylist {
    calls: Mutex<Vec<PlaylistCall>>,
    failures_remaining: AtomicUsize,
    panics_remaining: AtomicUsize,
}

impl RecordingPlaylist {
    /// Fail the next `count` updates
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Panic on the next `count` updates
    pub fn panic_next(&self, count: usize) {
        self.panics_remaining.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PlaylistCall> {
        self.calls.lock().clone()
    }

    pub fn titles(&self, call: usize) -> Vec<String> {
        self.calls.lock()[call]
            .tracks
            .iter()
            .map(|t| t.title.clone())
            .collect()
    }
}

#[async_trait]
impl PlaylistUpdater for RecordingPlaylist {
    async fn update_playlist(
        &self,
        playlist_id: &str,
        mode: UploadMode,
        tracks: &[Track],
    ) -> anyhow::Result<PlaylistUpdateOutcome> {
        self.calls.lock().push(PlaylistCall {
            playlist_id: playlist_id.to_string(),
            mode,
            tracks: tracks.to_vec(),
        });

        let panics = self.panics_remaining.load(Ordering::SeqCst);
        if panics > 0 {
            self.panics_remaining.store(panics - 1, Ordering::SeqCst);
            panic!("card service client crashed");
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("card service unavailable");
        }

        let new_chapter_ids = match mode {
            UploadMode::Chapters => (0..tracks.len()).map(|i| i.to_string()).collect(),
            UploadMode::Tracks => vec!["0".to_string()],
        };
        Ok(PlaylistUpdateOutcome { new_chapter_ids })
    }
}

pub struct Harness {
    pub processor: UploadProcessor,
    pub uploader: Arc<ScriptedUploader>,
    pub normalizer: Arc<ScriptedNormalizer>,
    pub playlist: Arc<RecordingPlaylist>,
}

pub fn config(workers: usize) -> ProcessorConfig {
    ProcessorConfig {
        workers,
        ..Default::default()
    }
}

/// Processor with scripted collaborators; workers are already started
pub fn harness(config: ProcessorConfig) -> Harness {
    let uploader = Arc::new(ScriptedUploader::default());
    let normalizer = Arc::new(ScriptedNormalizer::default());
    let playlist = Arc::new(RecordingPlaylist::default());

    let collaborators = Collaborators {
        normalizer: normalizer.clone(),
        uploader: uploader.clone(),
        playlist: playlist.clone(),
    };
    let processor = UploadProcessor::new(config, collaborators).expect("valid config");
    processor.start();

    Harness {
        processor,
        uploader,
        normalizer,
        playlist,
    }
}

/// Temp path for a file that does not exist on disk
pub fn fake_path(filename: &str) -> PathBuf {
    PathBuf::from("/nonexistent/wkmp-up-tests").join(filename)
}
