//! The download engine: sequenced, resumable, credential-aware transfers.
//!
//! This module turns a template URL and a file count into a
//! bounded-concurrency fetch pipeline with crash-safe checkpointing,
//! process-wide rate limiting, and mid-batch credential rotation.
//!
//! # Features
//!
//! - Deterministic URL/filename sequencing from one template URL
//! - Streaming downloads with byte-range resume from checkpoint sidecars
//! - Expired-session detection from response shape (HTML body, wrong
//!   signature, implausible size), not status codes
//! - Shared throughput ceiling across all workers
//! - Structural archive verification before a file counts as complete
//!
//! # Example
//!
//! ```no_run
//! use takeout_core::config::DownloadConfig;
//! use takeout_core::download::{DownloadEngine, EngineHooks};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig {
//!     template_url: "https://takeout.example.com/takeout-1-001.zip".to_string(),
//!     cookie: "SID=abc".to_string(),
//!     file_count: 10,
//!     ..DownloadConfig::default()
//! };
//! let engine = DownloadEngine::new(config, EngineHooks::default())?;
//! let stats = engine.run().await?;
//! println!("completed: {}", stats.completed());
//! # Ok(())
//! # }
//! ```

mod checkpoint;
pub mod constants;
mod engine;
mod error;
mod retry;
mod sequence;
mod task;
mod throughput;
mod verify;
mod worker;

pub use checkpoint::Checkpoint;
pub use engine::{AuthRefreshHook, BatchStats, DownloadEngine, EngineError, EngineHooks};
pub use error::{DownloadError, MalformedTemplate};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error, classify_status,
    parse_retry_after,
};
pub use sequence::BatchTemplate;
pub use task::{TaskStatus, TransferTask};
pub use throughput::ThroughputLimiter;
pub use verify::{VerifyError, verify_archive};
pub use worker::{ProgressHook, TransferOptions, TransferWorker};

// Note: no module-local Result aliases. Use `Result<T, DownloadError>`
// explicitly in function signatures.
