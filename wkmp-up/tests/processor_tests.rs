//! Integration tests for the upload processor
//!
//! Collaborators are scripted (see helpers); timing tests run on paused tokio
//! time so "30 seconds" of upload costs nothing.

mod helpers;

use helpers::{config, fake_path, harness, FileScript};
use std::time::Duration;
use wkmp_up::{
    FileMetadata, FileStatus, SessionOptions, SessionStatus, UploadError, UploadEvent, UploadMode,
};

fn meta(filename: &str) -> FileMetadata {
    FileMetadata::new(filename, 1024, fake_path(filename))
}

fn batch_options() -> SessionOptions {
    SessionOptions {
        normalize: true,
        normalize_batch: true,
        ..Default::default()
    }
}

// ============================================================================
// Parallelism and ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_files_process_in_parallel() {
    let h = harness(config(2));
    h.uploader.delay("f1.mp3", Duration::from_secs(30));
    h.uploader.delay("f2.mp3", Duration::from_secs(5));

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("f1.mp3")).unwrap();
    h.processor.add_file(sid, meta("f2.mp3")).unwrap();

    let start = tokio::time::Instant::now();
    assert_eq!(h.processor.enqueue_processing(sid).unwrap(), 2);
    h.processor.wait_idle().await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(30), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(35), "files ran sequentially: {:?}", elapsed);

    // Completion order differs from registration order
    assert_eq!(h.uploader.completed(), vec!["f2.mp3", "f1.mp3"]);

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(h.playlist.titles(0), vec!["f1", "f2"]);
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_completions_finalize_once() {
    let h = harness(config(4));
    let mut events = h.processor.subscribe();
    let names = ["a.mp3", "b.mp3", "c.mp3", "d.mp3"];
    for name in names {
        h.uploader.delay(name, Duration::from_secs(10));
    }

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    for name in names {
        h.processor.add_file(sid, meta(name)).unwrap();
    }
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    // All four uploads end on the same tick on different workers
    assert_eq!(h.playlist.calls().len(), 1);
    assert_eq!(h.playlist.titles(0), vec!["a", "b", "c", "d"]);
    assert_eq!(h.processor.get_status(sid).unwrap().status, SessionStatus::Completed);

    let mut finalized = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, UploadEvent::SessionFinalized { session_id, .. } if session_id == sid) {
            finalized += 1;
        }
    }
    assert_eq!(finalized, 1);
}

#[tokio::test(start_paused = true)]
async fn test_final_order_follows_registration() {
    let h = harness(config(4));
    let names = ["a.mp3", "b.mp3", "c.mp3", "d.mp3"];
    for (i, name) in names.iter().enumerate() {
        // Later registrations finish first
        h.uploader.delay(name, Duration::from_secs(10 - i as u64 * 2));
    }

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    for name in names {
        h.processor.add_file(sid, meta(name)).unwrap();
    }
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert_eq!(h.uploader.completed(), vec!["d.mp3", "c.mp3", "b.mp3", "a.mp3"]);
    let calls = h.playlist.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(h.playlist.titles(0), vec!["a", "b", "c", "d"]);
    let keys: Vec<&str> = calls[0].tracks.iter().map(|t| t.key.as_str()).collect();
    assert_eq!(keys, vec!["0", "1", "2", "3"]);
}

// ============================================================================
// Enqueue and finalize
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_enqueue_is_idempotent() {
    let h = harness(config(2));
    h.uploader.delay("a.mp3", Duration::from_secs(1));
    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.add_file(sid, meta("b.mp3")).unwrap();

    assert_eq!(h.processor.enqueue_processing(sid).unwrap(), 2);
    assert_eq!(h.processor.enqueue_processing(sid).unwrap(), 0);
    h.processor.wait_idle().await;

    assert_eq!(h.uploader.calls(), 2);
    assert_eq!(h.playlist.calls().len(), 1);
}

#[tokio::test]
async fn test_enqueue_without_files_keeps_collecting() {
    let h = harness(config(2));
    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();

    assert_eq!(h.processor.enqueue_processing(sid).unwrap(), 0);
    assert_eq!(h.processor.get_status(sid).unwrap().status, SessionStatus::Collecting);
    assert!(h.playlist.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_files_added_while_processing_join_the_session() {
    let h = harness(config(1));
    h.uploader.delay("a.mp3", Duration::from_secs(10));
    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.processor.add_file(sid, meta("b.mp3")).unwrap();
    assert_eq!(h.processor.enqueue_processing(sid).unwrap(), 1);
    h.processor.wait_idle().await;

    assert_eq!(h.playlist.calls().len(), 1);
    assert_eq!(h.playlist.titles(0), vec!["a", "b"]);
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let h = harness(config(1));
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        h.processor.enqueue_processing(missing),
        Err(UploadError::SessionNotFound(id)) if id == missing
    ));
    assert!(matches!(
        h.processor.get_status(missing),
        Err(UploadError::SessionNotFound(_))
    ));
    assert!(matches!(
        h.processor.register_session("  ", SessionOptions::default()),
        Err(UploadError::InvalidInput(_))
    ));
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test]
async fn test_file_failure_is_isolated() {
    let h = harness(config(3));
    h.uploader.fail("b.mp3", "transcode rejected");

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    let _a = h.processor.add_file(sid, meta("a.mp3")).unwrap();
    let b = h.processor.add_file(sid, meta("b.mp3")).unwrap();
    let _c = h.processor.add_file(sid, meta("c.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert!(status.error_message.is_none());

    let failed: Vec<_> = status.failed_files().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].file_id, b);
    assert_eq!(failed[0].error.as_deref(), Some("transcode rejected"));

    assert_eq!(h.playlist.titles(0), vec!["a", "c"]);
}

#[tokio::test]
async fn test_panicking_uploader_fails_only_its_file() {
    let h = harness(config(2));
    h.uploader.script(
        "b.mp3",
        FileScript {
            panic: true,
            ..Default::default()
        },
    );

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    let b = h.processor.add_file(sid, meta("b.mp3")).unwrap();
    h.processor.add_file(sid, meta("c.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    let failed = status.file(b).unwrap();
    assert_eq!(failed.status, FileStatus::Error);
    assert!(failed.error.as_deref().unwrap().starts_with("Internal error"));
    assert_eq!(h.playlist.titles(0), vec!["a", "c"]);
}

#[tokio::test]
async fn test_all_files_failing_completes_without_playlist_update() {
    let h = harness(config(2));
    h.uploader.fail("a.mp3", "unsupported codec");

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert!(h.playlist.calls().is_empty());
}

// ============================================================================
// Normalization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_batch_normalization_runs_once() {
    let h = harness(config(4));
    h.normalizer.set_delay(Duration::from_secs(3));

    let sid = h.processor.register_session("card-1", batch_options()).unwrap();
    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        h.processor.add_file(sid, meta(name)).unwrap();
    }
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert_eq!(h.normalizer.batch_calls(), 1);
    assert_eq!(h.normalizer.single_calls(), 0);
    assert_eq!(h.normalizer.batch_sizes(), vec![3]);

    // Every file was uploaded from its normalized copy
    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        let path = h.uploader.seen_path(name).unwrap();
        assert!(path.to_string_lossy().ends_with(".norm.mp3"), "{:?}", path);
    }
    assert_eq!(h.processor.get_status(sid).unwrap().status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_batch_normalization_failure_is_session_fatal() {
    let h = harness(config(3));
    h.normalizer.fail_with("clipping detected");

    let sid = h.processor.register_session("card-1", batch_options()).unwrap();
    for name in ["a.mp3", "b.mp3", "c.mp3"] {
        h.processor.add_file(sid, meta(name)).unwrap();
    }
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Error);
    assert_eq!(
        status.error_message.as_deref(),
        Some("Normalization failed: clipping detected")
    );
    for file in &status.files {
        assert_eq!(file.status, FileStatus::Error);
        assert_eq!(file.error.as_deref(), Some("Normalization failed: clipping detected"));
    }

    assert_eq!(h.normalizer.batch_calls(), 1);
    assert_eq!(h.uploader.calls(), 0);
    assert!(h.playlist.calls().is_empty());
}

#[tokio::test]
async fn test_panicking_batch_normalizer_is_session_fatal() {
    let h = harness(config(4));
    h.normalizer.set_delay(Duration::from_millis(20));
    h.normalizer.panic_on_call();

    let sid = h.processor.register_session("card-1", batch_options()).unwrap();
    for name in ["a.mp3", "b.mp3", "c.mp3", "d.mp3"] {
        h.processor.add_file(sid, meta(name)).unwrap();
    }
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert_eq!(h.normalizer.batch_calls(), 1);
    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Error);
    let message = status.error_message.clone().unwrap();
    assert!(message.starts_with("Normalization failed:"), "{}", message);
    assert!(status
        .files
        .iter()
        .all(|f| f.status == FileStatus::Error && f.error.as_deref() == Some(message.as_str())));

    assert_eq!(h.uploader.calls(), 0);
    assert!(h.playlist.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_late_file_rejected_after_batch_claim() {
    let h = harness(config(2));
    h.normalizer.set_delay(Duration::from_secs(5));

    let sid = h.processor.register_session("card-1", batch_options()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(matches!(
        h.processor.add_file(sid, meta("late.mp3")),
        Err(UploadError::Conflict(_))
    ));

    h.processor.wait_idle().await;
    assert_eq!(h.normalizer.batch_sizes(), vec![1]);
    assert_eq!(h.processor.get_status(sid).unwrap().files.len(), 1);
}

#[tokio::test]
async fn test_single_file_normalization() {
    let h = harness(config(2));
    let options = SessionOptions {
        normalize: true,
        target_lufs: Some(-16.0),
        ..Default::default()
    };

    let sid = h.processor.register_session("card-1", options).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.add_file(sid, meta("b.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert_eq!(h.normalizer.single_calls(), 2);
    assert_eq!(h.normalizer.batch_calls(), 0);
    assert!(h
        .uploader
        .seen_path("a.mp3")
        .unwrap()
        .to_string_lossy()
        .ends_with("a.norm.mp3"));
}

// ============================================================================
// Finalize failure and retry
// ============================================================================

#[tokio::test]
async fn test_finalize_failure_then_retry() {
    let h = harness(config(2));
    h.playlist.fail_next(1);

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.add_file(sid, meta("b.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Error);
    assert_eq!(
        status.error_message.as_deref(),
        Some("Failed to add tracks to playlist: card service unavailable")
    );
    assert!(status.files.iter().all(|f| f.status == FileStatus::Done));

    let report = h.processor.retry_finalize(sid).await.unwrap();
    assert_eq!(report.tracks_added, 2);
    assert_eq!(report.new_chapter_ids, vec!["0", "1"]);

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert!(status.error_message.is_none());

    // Retry re-used the recorded tracks
    assert_eq!(h.uploader.calls(), 2);
    assert_eq!(h.playlist.calls().len(), 2);
    assert_eq!(h.playlist.titles(1), vec!["a", "b"]);

    assert!(matches!(
        h.processor.retry_finalize(sid).await,
        Err(UploadError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_panicking_playlist_update_is_retryable() {
    let h = harness(config(1));
    h.playlist.panic_next(1);

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Error);
    assert!(status
        .error_message
        .as_deref()
        .is_some_and(|m| m.starts_with("Failed to add tracks to playlist:")));
    assert_eq!(status.files[0].status, FileStatus::Done);

    let report = h.processor.retry_finalize(sid).await.unwrap();
    assert_eq!(report.tracks_added, 1);
    assert_eq!(h.processor.get_status(sid).unwrap().status, SessionStatus::Completed);
    assert_eq!(h.uploader.calls(), 1);
    assert_eq!(h.playlist.titles(1), vec!["a"]);

    h.processor.remove_session(sid).await.unwrap();
    assert!(h.processor.get_status(sid).is_err());
}

#[tokio::test]
async fn test_retry_requires_failed_finalize() {
    let h = harness(config(1));
    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    assert!(matches!(
        h.processor.retry_finalize(sid).await,
        Err(UploadError::Conflict(_))
    ));
}

// ============================================================================
// Titles, modes and session management
// ============================================================================

#[tokio::test]
async fn test_track_title_resolution() {
    let h = harness(config(2));
    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    let a = h.processor.add_file(sid, meta("01 - intro.mp3")).unwrap();
    h.processor
        .add_file(sid, meta("02.mp3").with_original_title("Second Song"))
        .unwrap();
    h.processor.add_file(sid, meta("03 - outro.mp3")).unwrap();

    h.processor.set_file_title(sid, a, "Welcome").unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert_eq!(h.playlist.titles(0), vec!["Welcome", "Second Song", "03 - outro"]);
    assert!(matches!(
        h.processor.set_file_title(sid, a, "Too late"),
        Err(UploadError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_upload_mode_reaches_playlist() {
    let h = harness(config(2));
    let options = SessionOptions {
        upload_mode: UploadMode::Tracks,
        ..Default::default()
    };
    let sid = h.processor.register_session("card-9", options).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let calls = h.playlist.calls();
    assert_eq!(calls[0].playlist_id, "card-9");
    assert_eq!(calls[0].mode, UploadMode::Tracks);
    assert_eq!(
        h.processor.get_status(sid).unwrap().new_chapter_ids,
        vec!["0".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_session_fails_unstarted_files() {
    let h = harness(config(1));
    h.uploader.delay("a.mp3", Duration::from_secs(10));

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    let a = h.processor.add_file(sid, meta("a.mp3")).unwrap();
    let b = h.processor.add_file(sid, meta("b.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.processor.stop_session(sid).await.unwrap();
    h.processor.wait_idle().await;

    let status = h.processor.get_status(sid).unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.file(a).unwrap().status, FileStatus::Done);
    let stopped = status.file(b).unwrap();
    assert_eq!(stopped.status, FileStatus::Error);
    assert_eq!(stopped.error.as_deref(), Some(wkmp_up::workflow::STOPPED_MESSAGE));
    assert_eq!(h.playlist.titles(0), vec!["a"]);
}

#[tokio::test]
async fn test_playlist_sessions_and_removal() {
    let h = harness(config(2));
    let done = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(done, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(done).unwrap();
    h.processor.wait_idle().await;

    let open = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.register_session("card-2", SessionOptions::default()).unwrap();

    assert_eq!(h.processor.playlist_sessions("card-1", true).len(), 2);
    let active = h.processor.playlist_sessions("card-1", false);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].session_id, open);

    h.processor.remove_session(done).await.unwrap();
    assert!(matches!(
        h.processor.get_status(done),
        Err(UploadError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_temp_files_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.mp3");
    let bad = dir.path().join("bad.mp3");
    std::fs::write(&good, b"ID3").unwrap();
    std::fs::write(&bad, b"ID3").unwrap();

    let h = harness(config(2));
    h.uploader.fail("bad.mp3", "corrupt frame header");

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor
        .add_file(sid, FileMetadata::new("good.mp3", 3, &good))
        .unwrap();
    h.processor
        .add_file(sid, FileMetadata::new("bad.mp3", 3, &bad))
        .unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert!(!good.exists(), "processed upload should be removed");
    assert!(bad.exists(), "failed upload is kept until the session is removed");

    h.processor.remove_session(sid).await.unwrap();
    assert!(!bad.exists());
}

#[tokio::test]
async fn test_completed_session_dropped_when_not_retained() {
    let mut cfg = config(2);
    cfg.retain_completed_sessions = false;
    let h = harness(cfg);

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    assert_eq!(h.playlist.calls().len(), 1);
    assert!(matches!(
        h.processor.get_status(sid),
        Err(UploadError::SessionNotFound(_))
    ));
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_events_report_progress_and_finalize() {
    let h = harness(config(2));
    let mut events = h.processor.subscribe();

    let sid = h.processor.register_session("card-1", SessionOptions::default()).unwrap();
    let a = h.processor.add_file(sid, meta("a.mp3")).unwrap();
    h.processor.enqueue_processing(sid).unwrap();
    h.processor.wait_idle().await;

    let mut statuses = Vec::new();
    let mut finalized = None;
    while let Ok(event) = events.try_recv() {
        match event {
            UploadEvent::FileStatusChanged { file_id, status, .. } if file_id == a => {
                if statuses.last() != Some(&status) {
                    statuses.push(status);
                }
            }
            UploadEvent::SessionFinalized {
                session_id,
                tracks_added,
                success,
                ..
            } if session_id == sid => finalized = Some((tracks_added, success)),
            _ => {}
        }
    }

    assert_eq!(
        statuses,
        vec![FileStatus::Analyzing, FileStatus::Uploading, FileStatus::Done]
    );
    assert_eq!(finalized, Some((1, true)));
}
