//! Best-effort cleanup of uploaded and intermediate audio files

use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

/// Delete a temporary file, logging instead of failing
///
/// Returns true when the file is gone afterwards (including when it never existed).
pub async fn remove_temp_file(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed temporary file");
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
            false
        }
    }
}
