//! Process-wide throughput governor for download streams.
//!
//! This module provides the [`ThroughputLimiter`], a rolling one-second
//! accounting window shared by every worker in a batch. Each worker calls
//! [`admit`](ThroughputLimiter::admit) before writing a chunk; once the
//! window's byte budget is spent, callers sleep until the window rolls over,
//! keeping aggregate throughput at or under the configured ceiling.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use takeout_core::download::ThroughputLimiter;
//!
//! # async fn example() {
//! // 8 MiB/s across all workers
//! let limiter = Arc::new(ThroughputLimiter::new(8 * 1024 * 1024));
//!
//! let shared = Arc::clone(&limiter);
//! tokio::spawn(async move {
//!     shared.admit(65_536).await;
//!     // ... write the chunk
//! });
//! # }
//! ```

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Length of the accounting window.
const WINDOW: Duration = Duration::from_secs(1);

/// Rolling-window accounting state.
#[derive(Debug)]
struct Window {
    /// When the current window opened.
    started: Instant,
    /// Bytes admitted inside the current window.
    admitted: u64,
}

/// Shared byte-per-second ceiling across all concurrent transfers.
///
/// Designed to be wrapped in `Arc` and shared by reference with every
/// worker in a batch. A ceiling of zero disables limiting entirely:
/// `admit` returns immediately without touching the window state.
///
/// Admissions serialize on the window lock, including the sleep that spends
/// the rest of an exhausted window; that serialization is what makes the
/// accounting process-wide rather than per-worker.
#[derive(Debug)]
pub struct ThroughputLimiter {
    /// Configured ceiling in bytes per second; 0 disables limiting.
    bytes_per_sec: u64,
    /// Window state, mutation-guarded.
    window: Mutex<Window>,
}

impl ThroughputLimiter {
    /// Creates a limiter with the given ceiling in bytes per second.
    ///
    /// A ceiling of 0 creates an unlimited limiter.
    #[must_use]
    #[instrument]
    pub fn new(bytes_per_sec: u64) -> Self {
        debug!(bytes_per_sec, "creating throughput limiter");
        Self {
            bytes_per_sec,
            window: Mutex::new(Window {
                started: Instant::now(),
                admitted: 0,
            }),
        }
    }

    /// Creates a limiter that never delays.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Returns true when no ceiling is configured.
    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.bytes_per_sec == 0
    }

    /// Returns the configured ceiling in bytes per second (0 = unlimited).
    #[must_use]
    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Accounts for `n` bytes, sleeping as needed to hold the ceiling.
    ///
    /// Called before each chunk write. When the current window's budget is
    /// already spent, the caller sleeps for the remainder of the window and
    /// a fresh window opens.
    pub async fn admit(&self, n: u64) {
        if self.bytes_per_sec == 0 {
            return;
        }

        let mut window = self.window.lock().await;
        let elapsed = window.started.elapsed();

        if elapsed >= WINDOW {
            // Stale window: open a new one charged with this chunk.
            window.started = Instant::now();
            window.admitted = n;
            return;
        }

        window.admitted += n;
        if window.admitted >= self.bytes_per_sec {
            let wait = WINDOW.saturating_sub(elapsed);
            trace!(wait_ms = wait.as_millis(), "window budget spent, sleeping");
            // Sleeping with the guard held stalls every other admission
            // until the window rolls over.
            tokio::time::sleep(wait).await;
            window.started = Instant::now();
            window.admitted = 0;
        }
    }
}
