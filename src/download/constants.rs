//! Constants for the download module (timeouts, thresholds, file layout).

use std::time::Duration;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default HTTP read timeout between received bytes (5 minutes for large archives).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of concurrent transfer workers.
pub const DEFAULT_PARALLELISM: usize = 6;

/// Default number of files in a batch.
pub const DEFAULT_FILE_COUNT: u32 = 100;

/// Minimum allowed parallelism value.
pub const MIN_PARALLELISM: usize = 1;

/// Maximum allowed parallelism value.
pub const MAX_PARALLELISM: usize = 100;

/// Leading bytes every takeout archive must start with (ZIP local-file signature).
pub const ARCHIVE_SIGNATURE: &[u8] = b"PK";

/// Smallest total size a real takeout archive can plausibly have.
///
/// The remote service reports expired-session pages with small bodies and a
/// 200 status, so an implausibly small total is a credential problem, not a
/// short file.
pub const MIN_PLAUSIBLE_TOTAL_BYTES: u64 = 1_000_000;

/// Smallest on-disk size the verifier accepts as a structurally valid archive.
pub const MIN_VALID_ARCHIVE_BYTES: u64 = 1_000;

/// Bytes written between checkpoint flushes (10 MiB).
pub const CHECKPOINT_INTERVAL_BYTES: u64 = 10 * 1024 * 1024;

/// Suffix for in-flight temporary files.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Suffix for checkpoint sidecar files.
pub const PROGRESS_SUFFIX: &str = ".progress";

/// Number of leading body bytes inspected when classifying an HTML response.
pub const HTML_PREVIEW_BYTES: usize = 500;

/// Session age at which an expiry warning is emitted (45 minutes).
pub const AUTH_WARNING_AGE: Duration = Duration::from_secs(45 * 60);

/// Typical session lifetime before the remote service rejects the credential.
pub const AUTH_SESSION_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Browser User-Agent sent with every request.
///
/// The remote service serves login interstitials to unrecognized clients,
/// so the engine identifies as a current desktop browser.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
