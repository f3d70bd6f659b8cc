//! Batch normalization coordinator
//!
//! Sessions with `normalize_batch` level all their files jointly, exactly
//! once, before any of them is analyzed. The first worker to reach a session
//! claims the job and runs it; every other worker for that session waits on
//! the claim's `Notify` and then reads the recorded outcome.
//!
//! A batch failure is session-fatal: the session moves to `error` and every
//! waiting or later worker fails its file with the same message.

use super::session_store::SessionStore;
use super::temp_files::remove_temp_file;
use crate::error::{UploadError, UploadResult};
use crate::types::AudioNormalizer;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum BatchState {
    Running(Arc<Notify>),
    Normalized,
    Failed(String),
}

enum Role {
    Lead,
    Wait(Arc<Notify>),
}

pub struct BatchNormalizationCoordinator {
    store: Arc<SessionStore>,
    normalizer: Arc<dyn AudioNormalizer>,
    states: Mutex<HashMap<Uuid, BatchState>>,
}

/// Releases an unfinished claim if the leading task is dropped mid-run
struct ClaimGuard<'a> {
    coordinator: &'a BatchNormalizationCoordinator,
    session_id: Uuid,
    armed: bool,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut states = self.coordinator.states.lock();
        if let Some(BatchState::Running(notify)) = states.remove(&self.session_id) {
            notify.notify_waiters();
        }
    }
}

impl BatchNormalizationCoordinator {
    pub fn new(store: Arc<SessionStore>, normalizer: Arc<dyn AudioNormalizer>) -> Self {
        Self {
            store,
            normalizer,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Make sure the session's batch has been normalized
    ///
    /// Returns once the joint normalization has succeeded, running it if no
    /// other task has. Returns `BatchNormalization` if it failed.
    pub async fn ensure_batch_normalization(&self, session_id: Uuid) -> UploadResult<()> {
        loop {
            let role = {
                let mut states = self.states.lock();
                match states.get(&session_id) {
                    Some(BatchState::Normalized) => return Ok(()),
                    Some(BatchState::Failed(message)) => {
                        return Err(UploadError::BatchNormalization(message.clone()))
                    }
                    Some(BatchState::Running(notify)) => Role::Wait(Arc::clone(notify)),
                    None => {
                        states.insert(session_id, BatchState::Running(Arc::new(Notify::new())));
                        Role::Lead
                    }
                }
            };

            match role {
                Role::Wait(notify) => {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    // The leader records its outcome before notifying
                    if self.is_running(session_id) {
                        notified.await;
                    }
                }
                Role::Lead => return self.run(session_id).await,
            }
        }
    }

    fn is_running(&self, session_id: Uuid) -> bool {
        matches!(self.states.lock().get(&session_id), Some(BatchState::Running(_)))
    }

    async fn run(&self, session_id: Uuid) -> UploadResult<()> {
        let mut guard = ClaimGuard {
            coordinator: self,
            session_id,
            armed: true,
        };

        let claim = self.store.claim_batch_files(session_id)?;
        let inputs: Vec<_> = claim.files.iter().map(|(_, path)| path.clone()).collect();

        info!(
            session_id = %session_id,
            files = inputs.len(),
            target_lufs = claim.target_lufs,
            "Starting batch normalization"
        );
        let start = Instant::now();

        // A panicking normalizer surfaces as a JoinError and fails the batch
        let normalizer = Arc::clone(&self.normalizer);
        let batch_inputs = inputs.clone();
        let target_lufs = claim.target_lufs;
        let joined = tokio::spawn(async move {
            normalizer.normalize(&batch_inputs, true, target_lufs).await
        })
        .await;

        let outcome = match joined {
            Err(e) => Err(format!("normalizer task failed: {}", e)),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(outputs)) if outputs.len() == inputs.len() => {
                for ((file_id, input), output) in claim.files.iter().zip(outputs) {
                    if output == *input {
                        continue;
                    }
                    // Session may have been removed meanwhile; the new file is then orphaned
                    if self.store.set_file_path(session_id, *file_id, output).is_ok() {
                        remove_temp_file(input).await;
                    }
                }
                Ok(())
            }
            Ok(Ok(outputs)) => Err(format!(
                "normalizer returned {} outputs for {} inputs",
                outputs.len(),
                inputs.len()
            )),
        };

        let (state, result) = match outcome {
            Ok(()) => {
                info!(
                    session_id = %session_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Batch normalization complete"
                );
                (BatchState::Normalized, Ok(()))
            }
            Err(message) => {
                let error = UploadError::BatchNormalization(message.clone());
                warn!(session_id = %session_id, error = %error, "Batch normalization failed");
                let _ = self.store.fail_session(session_id, &error.to_string());
                (BatchState::Failed(message), Err(error))
            }
        };

        guard.armed = false;
        let previous = self.states.lock().insert(session_id, state);
        if let Some(BatchState::Running(notify)) = previous {
            notify.notify_waiters();
        }

        result
    }

    /// Drop the recorded outcome for a settled session
    pub fn forget(&self, session_id: Uuid) {
        self.states.lock().remove(&session_id);
    }
}
