//! Checkpoint sidecars: durable per-task progress for crash-safe resume.
//!
//! Each in-flight task owns one `<filename>.progress` JSON sidecar next to
//! its partial file. The sidecar is written by the worker at a fixed byte
//! cadence, read when the task list is (re)built, and deleted on success.
//! Its existence alongside a missing final file signals "resumable"; beside
//! an existing final file it is stale and gets cleared.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::constants::PROGRESS_SUFFIX;
use super::error::DownloadError;
use super::task::{TransferTask, append_suffix};

/// Durable record of one task's partial progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Source URL at the time the checkpoint was written.
    pub url: String,
    /// Total size reported by the server, 0 if not yet known.
    pub total_bytes: u64,
    /// Bytes confirmed on disk when the checkpoint was flushed.
    pub downloaded_bytes: u64,
    /// Unix seconds when streaming first began.
    pub started_at: Option<u64>,
}

impl Checkpoint {
    /// Sidecar path for a given final output path (`<final>.progress`).
    #[must_use]
    pub fn sidecar_path(output_path: &Path) -> PathBuf {
        append_suffix(output_path, PROGRESS_SUFFIX)
    }

    /// Captures the current progress of a task.
    #[must_use]
    pub fn for_task(task: &TransferTask) -> Self {
        Self {
            url: task.url.clone(),
            total_bytes: task.total_bytes,
            downloaded_bytes: task.downloaded_bytes,
            started_at: task
                .started_at
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs()),
        }
    }

    /// The recorded start time as a [`SystemTime`], when present.
    #[must_use]
    pub fn started_at_time(&self) -> Option<SystemTime> {
        self.started_at
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// Persists the checkpoint beside the task's final path.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when serialization or the write fails.
    pub async fn save(&self, output_path: &Path) -> Result<(), DownloadError> {
        let sidecar = Self::sidecar_path(output_path);
        let body = serde_json::to_vec(self)
            .map_err(|e| DownloadError::io(sidecar.clone(), std::io::Error::other(e)))?;
        tokio::fs::write(&sidecar, body)
            .await
            .map_err(|e| DownloadError::io(sidecar.clone(), e))?;
        debug!(
            path = %sidecar.display(),
            downloaded_bytes = self.downloaded_bytes,
            "checkpoint flushed"
        );
        Ok(())
    }

    /// Loads the checkpoint for a final path, if a readable one exists.
    ///
    /// A missing sidecar is normal (fresh task); an unreadable or corrupt
    /// sidecar is treated the same way, so a torn write during a crash only
    /// costs a re-download.
    pub async fn load(output_path: &Path) -> Option<Self> {
        let sidecar = Self::sidecar_path(output_path);
        let body = match tokio::fs::read(&sidecar).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %sidecar.display(), error = %e, "cannot read checkpoint");
                return None;
            }
        };
        match serde_json::from_slice(&body) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(
                    path = %sidecar.display(),
                    error = %e,
                    "discarding corrupt checkpoint"
                );
                None
            }
        }
    }

    /// Removes the checkpoint for a final path, ignoring a missing sidecar.
    pub async fn clear(output_path: &Path) {
        let sidecar = Self::sidecar_path(output_path);
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => debug!(path = %sidecar.display(), "checkpoint cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %sidecar.display(), error = %e, "cannot clear checkpoint"),
        }
    }
}
