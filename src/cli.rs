//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use takeout_core::download::constants::{DEFAULT_FILE_COUNT, DEFAULT_PARALLELISM};

/// Bulk download, resume, and verify takeout archive batches.
///
/// Point it at any file URL from the batch plus the session cookie (or just
/// paste the whole cURL command from browser devtools) and it fetches the
/// numbered sequence with resume, verification, and credential rotation.
#[derive(Parser, Debug)]
#[command(name = "takeout-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Session cookie, or a full cURL command copied from browser devtools
    /// (falls back to the GOOGLE_COOKIE environment variable)
    #[arg(long)]
    pub cookie: Option<String>,

    /// URL of any file in the batch (falls back to TAKEOUT_URL)
    #[arg(long)]
    pub url: Option<String>,

    /// Output directory (falls back to OUTPUT_DIR)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of files in the batch
    #[arg(short = 'n', long, default_value_t = DEFAULT_FILE_COUNT)]
    pub count: u32,

    /// Parallel downloads (1-100)
    #[arg(short = 'p', long, default_value_t = DEFAULT_PARALLELISM as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub parallel: u8,

    /// Speed limit in MB/s (0 = unlimited)
    #[arg(long, default_value_t = 0.0)]
    pub speed_limit: f64,

    /// Disable resume support
    #[arg(long)]
    pub no_resume: bool,

    /// Disable archive verification
    #[arg(long)]
    pub no_verify: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
