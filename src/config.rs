//! Engine configuration values.
//!
//! These are the settled values the engine consumes, not the flag surface
//! that produces them; the CLI (or any other frontend) owns defaults
//! resolution, environment fallbacks, and unit conversion.

use std::path::PathBuf;

use crate::download::constants::{DEFAULT_FILE_COUNT, DEFAULT_PARALLELISM};

/// Configuration for one batch run.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Template URL of any file in the batch.
    pub template_url: String,
    /// Initial session cookie.
    pub cookie: String,
    /// Directory final files land in.
    pub output_dir: PathBuf,
    /// Number of files in the batch, indexed from 1.
    pub file_count: u32,
    /// Maximum concurrently-running transfer workers.
    pub parallelism: usize,
    /// Process-wide throughput ceiling in bytes per second; 0 = unlimited.
    pub speed_limit: u64,
    /// Whether partial transfers resume from their checkpointed offset.
    pub resume_enabled: bool,
    /// Whether completed archives are structurally verified.
    pub verify_enabled: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            template_url: String::new(),
            cookie: String::new(),
            output_dir: PathBuf::from("./downloads"),
            file_count: DEFAULT_FILE_COUNT,
            parallelism: DEFAULT_PARALLELISM,
            speed_limit: 0,
            resume_enabled: true,
            verify_enabled: true,
        }
    }
}
