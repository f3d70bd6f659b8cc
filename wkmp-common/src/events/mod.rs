//! Event types for WKMP event system
//!
//! Provides the upload event definitions and the EventBus used to broadcast
//! them to any number of observers (SSE bridges, progress UIs, tests).

mod upload_types;

pub use upload_types::{FileStatus, SessionStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Upload processing events
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum UploadEvent {
    /// A file moved to a new processing status
    FileStatusChanged {
        session_id: Uuid,
        file_id: Uuid,
        status: FileStatus,
        /// Progress fraction (0.0 - 1.0)
        progress: f64,
        /// Error message when `status` is `error`
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A session moved to a new overall status
    SessionStatusChanged {
        session_id: Uuid,
        old_status: SessionStatus,
        new_status: SessionStatus,
        timestamp: DateTime<Utc>,
    },

    /// Playlist update issued for a session
    ///
    /// `success == false` means the update failed and may be retried.
    SessionFinalized {
        session_id: Uuid,
        playlist_id: String,
        tracks_added: usize,
        files_failed: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Slow subscribers lose the
/// oldest events once `capacity` is exceeded.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use wkmp_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: UploadEvent) -> Result<usize, broadcast::error::SendError<UploadEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: UploadEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_event(status: FileStatus) -> UploadEvent {
        UploadEvent::FileStatusChanged {
            session_id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            status,
            progress: 0.5,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(8);
        assert!(bus.emit(file_event(FileStatus::Analyzing)).is_err());
        // Lossy variant must not panic
        bus.emit_lossy(file_event(FileStatus::Analyzing));
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let event = file_event(FileStatus::Done);
        bus.emit(event.clone()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(file_event(FileStatus::Normalizing)).unwrap();
        assert_eq!(json["type"], "FileStatusChanged");
        assert_eq!(json["status"], "normalizing");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(FileStatus::Done.is_terminal());
        assert!(FileStatus::Error.is_terminal());
        assert!(!FileStatus::Uploading.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Finalizing.is_terminal());
    }
}
