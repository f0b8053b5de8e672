//! Transfer task state: one numbered archive to acquire.
//!
//! A [`TransferTask`] is created when the task list is built (fresh, or
//! rehydrated from a checkpoint sidecar), mutated exclusively by the worker
//! processing it, and retired once its terminal status is recorded by the
//! coordinator.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::constants::PARTIAL_SUFFIX;

/// Status of a transfer task.
///
/// Transitions: `Pending → Downloading → {Complete | Failed | Paused}`.
/// `Paused` re-enters `Downloading` on the next batch round; `Complete` is
/// never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not yet dispatched to a worker.
    Pending,
    /// A worker is streaming the body.
    Downloading,
    /// Final file written, renamed, and (when enabled) verified.
    Complete,
    /// Terminal for this batch pass; see [`TransferTask::auth_failure`].
    Failed,
    /// Cooperative stop observed between chunks; checkpoint flushed.
    Paused,
}

impl TaskStatus {
    /// Returns true for statuses a worker can return from.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Paused)
    }

    /// Returns true for statuses the coordinator will (re)dispatch.
    #[must_use]
    pub fn is_dispatchable(self) -> bool {
        matches!(self, Self::Pending | Self::Paused)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// One file to acquire: identity, progress, and terminal outcome.
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// Stable local filename, derived by the sequencer.
    pub filename: String,
    /// Resolved source URL for this index.
    pub url: String,
    /// Final destination path (`<output_dir>/<filename>`).
    pub output_path: PathBuf,
    /// Expected total size; 0 until the response reports it.
    pub total_bytes: u64,
    /// Bytes confirmed written to the partial file.
    pub downloaded_bytes: u64,
    /// Current position in the state machine.
    pub status: TaskStatus,
    /// Human-readable failure description, set alongside `Failed`.
    pub error: Option<String>,
    /// Distinguishes a credential problem from an ordinary transport/IO one.
    ///
    /// An auth failure is a batch-wide signal: the coordinator drains the
    /// pool and requests a credential refresh instead of retrying this task.
    pub auth_failure: bool,
    /// When streaming first began (survives resume via the checkpoint).
    pub started_at: Option<SystemTime>,
}

impl TransferTask {
    /// Creates a pending task for one sequenced file.
    #[must_use]
    pub fn new(filename: String, url: String, output_dir: &Path) -> Self {
        let output_path = output_dir.join(&filename);
        Self {
            filename,
            url,
            output_path,
            total_bytes: 0,
            downloaded_bytes: 0,
            status: TaskStatus::Pending,
            error: None,
            auth_failure: false,
            started_at: None,
        }
    }

    /// Path of the in-flight temporary file (`<final>.partial`).
    #[must_use]
    pub fn partial_path(&self) -> PathBuf {
        append_suffix(&self.output_path, PARTIAL_SUFFIX)
    }

    /// Completion percentage, 0 until the total size is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.downloaded_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Records an ordinary (retryable) failure.
    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.auth_failure = false;
    }

    /// Records a credential failure, the batch-wide halt signal.
    pub(crate) fn fail_auth(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.auth_failure = true;
    }
}

/// Appends a suffix to the final path component, keeping the directory.
pub(crate) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn task() -> TransferTask {
        TransferTask::new(
            "takeout-1-001.zip".to_string(),
            "https://x/takeout-1-001.zip".to_string(),
            Path::new("/downloads"),
        )
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.total_bytes, 0);
        assert_eq!(task.downloaded_bytes, 0);
        assert!(task.error.is_none());
        assert!(!task.auth_failure);
        assert_eq!(task.output_path, Path::new("/downloads/takeout-1-001.zip"));
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            task().partial_path(),
            Path::new("/downloads/takeout-1-001.zip.partial")
        );
    }

    #[test]
    fn test_percent_zero_until_total_known() {
        let mut task = task();
        task.downloaded_bytes = 512;
        assert!((task.percent() - 0.0).abs() < f64::EPSILON);

        task.total_bytes = 2048;
        assert!((task.percent() - 25.0).abs() < 0.001);
    }

    #[test]
    fn test_fail_clears_auth_flag() {
        let mut task = task();
        task.auth_failure = true;
        task.fail("connection reset");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("connection reset"));
        assert!(!task.auth_failure);
    }

    #[test]
    fn test_fail_auth_sets_flag() {
        let mut task = task();
        task.fail_auth("session expired");
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.auth_failure);
    }

    #[test]
    fn test_status_terminal_and_dispatchable() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Paused.is_terminal());

        assert!(TaskStatus::Pending.is_dispatchable());
        assert!(TaskStatus::Paused.is_dispatchable());
        assert!(!TaskStatus::Complete.is_dispatchable());
        assert!(!TaskStatus::Failed.is_dispatchable());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Downloading.to_string(), "downloading");
        assert_eq!(TaskStatus::Complete.to_string(), "complete");
    }
}
