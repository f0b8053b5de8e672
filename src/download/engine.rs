//! Batch coordinator for concurrent archive transfers.
//!
//! This module provides the [`DownloadEngine`] which drives a bounded pool
//! of transfer workers across a sequenced batch of files, detects systemic
//! authentication failure, drains the pool, requests a credential refresh,
//! and resumes with the remaining work.
//!
//! # Overview
//!
//! One `run()` call is one batch. The engine builds the task list from the
//! sequenced template and on-disk completion state, dispatches workers
//! under a semaphore, and loops in rounds. A round ends when the list is
//! exhausted, when an operator stop is observed, or when a worker reports a
//! credential failure; in that last case the refresh hook decides whether a
//! new round starts.
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
//!     file_count: 3,
//!     ..DownloadConfig::default()
//! };
//! let engine = DownloadEngine::new(config, EngineHooks::default())?;
//! let stats = engine.run().await?;
//! println!("completed: {}, failed: {}", stats.completed(), stats.failed());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, HeaderMap, HeaderValue};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::CredentialStore;
use crate::config::DownloadConfig;
use crate::notify::{EventKind, LogSink, Notification, NotificationSink};

use super::checkpoint::Checkpoint;
use super::constants::{
    BROWSER_USER_AGENT, CONNECT_TIMEOUT_SECS, MAX_PARALLELISM, MIN_PARALLELISM, READ_TIMEOUT_SECS,
};
use super::error::MalformedTemplate;
use super::retry::RetryPolicy;
use super::sequence::BatchTemplate;
use super::task::{TaskStatus, TransferTask};
use super::throughput::ThroughputLimiter;
use super::verify::verify_archive;
use super::worker::{ProgressHook, TransferOptions, TransferWorker};

/// Error type for engine construction and batch runs.
///
/// Per-task failures never surface here; they are recorded on the tasks and
/// in the aggregate counters. Only configuration problems and the fatal
/// template-parse case abort a batch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid parallelism value provided.
    #[error(
        "invalid parallelism value {value}: must be between {MIN_PARALLELISM} and {MAX_PARALLELISM}"
    )]
    InvalidParallelism {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The template URL does not contain the batch pattern.
    #[error(transparent)]
    Template(#[from] MalformedTemplate),

    /// The output directory could not be created.
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be built.
    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Synchronous credential-refresh hook.
///
/// Called with the entire worker pool drained; it is the only hook allowed
/// to block (typically on operator input). Returning a new cookie resumes
/// the batch; returning `None` ends it with the work done so far.
pub type AuthRefreshHook = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Injected engine-facing callbacks.
#[derive(Clone, Default)]
pub struct EngineHooks {
    /// Invoked after each chunk write; the consumer decides display cadence.
    pub on_progress: Option<ProgressHook>,
    /// Invoked when a credential failure has drained the pool.
    pub on_auth_expired: Option<AuthRefreshHook>,
}

impl std::fmt::Debug for EngineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHooks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_auth_expired", &self.on_auth_expired.is_some())
            .finish()
    }
}

/// Aggregate statistics for one batch run.
///
/// Counters are updated from concurrent workers through atomics; derived
/// values (throughput, ETA) are computed on demand, never stored.
#[derive(Debug)]
pub struct BatchStats {
    started: Instant,
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    bytes_downloaded: AtomicU64,
}

impl Default for BatchStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchStats {
    /// Creates a stats tracker; the batch clock starts now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
        }
    }

    /// Number of tasks in the batch (excluding skipped files).
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of successfully completed transfers.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of failed transfers (auth failures are a batch signal, not
    /// counted here).
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Number of files skipped because a valid copy already existed.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Cumulative bytes written across all workers.
    #[must_use]
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// Wall-clock time since the batch started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Mean throughput since the batch started, in bytes per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_downloaded() as f64 / secs
    }

    /// Estimated time remaining for `expected_total_bytes`, if computable.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self, expected_total_bytes: u64) -> Option<Duration> {
        let rate = self.throughput();
        if rate <= 0.0 {
            return None;
        }
        let remaining = expected_total_bytes.saturating_sub(self.bytes_downloaded());
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub(crate) fn set_total(&self, value: usize) {
        self.total.store(value, Ordering::SeqCst);
    }

    pub(crate) fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_skipped(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn add_bytes(&self, count: u64) {
        self.bytes_downloaded.fetch_add(count, Ordering::SeqCst);
    }
}

/// Batch coordinator: owns the worker pool and the credential lifecycle.
///
/// # Concurrency Model
///
/// - Each transfer runs in its own Tokio task
/// - A semaphore permit bounds how many stream at once
/// - Workers share the credential store, throughput limiter, and statistics
///   by `Arc`; those are the only cross-worker mutable state
/// - Dispatch order follows the task list, completion order does not; the
///   counters rely on atomic updates, not ordering
///
/// # Credential Rotation
///
/// The first worker to report a credential failure cancels the round's
/// token: tasks that have not started return undispatched, streaming
/// workers pause at their next chunk boundary with a flushed checkpoint.
/// Once the pool is drained the refresh hook runs; a new cookie starts a
/// new round over whatever is still missing on disk.
pub struct DownloadEngine {
    config: DownloadConfig,
    credentials: Arc<CredentialStore>,
    limiter: Arc<ThroughputLimiter>,
    semaphore: Arc<Semaphore>,
    client: Client,
    retry_policy: RetryPolicy,
    hooks: EngineHooks,
    notifier: Arc<dyn NotificationSink>,
    stop: CancellationToken,
}

impl DownloadEngine {
    /// Creates an engine for one batch configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidParallelism`] when the configured
    /// parallelism is outside `1..=100`, or [`EngineError::Client`] when
    /// the HTTP client cannot be built.
    #[instrument(level = "debug", skip(config, hooks), fields(parallelism = config.parallelism))]
    pub fn new(config: DownloadConfig, hooks: EngineHooks) -> Result<Self, EngineError> {
        if !(MIN_PARALLELISM..=MAX_PARALLELISM).contains(&config.parallelism) {
            return Err(EngineError::InvalidParallelism {
                value: config.parallelism,
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        // Archives must arrive as stored bytes; never let the transport
        // re-encode them.
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(EngineError::Client)?;

        debug!(
            parallelism = config.parallelism,
            speed_limit = config.speed_limit,
            resume = config.resume_enabled,
            verify = config.verify_enabled,
            "creating download engine"
        );

        Ok(Self {
            credentials: Arc::new(CredentialStore::new(config.cookie.as_str())),
            limiter: Arc::new(ThroughputLimiter::new(config.speed_limit)),
            semaphore: Arc::new(Semaphore::new(config.parallelism)),
            client,
            retry_policy: RetryPolicy::default(),
            hooks,
            notifier: Arc::new(LogSink),
            stop: CancellationToken::new(),
            config,
        })
    }

    /// Replaces the notification sink (defaults to the log sink).
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replaces the retry policy for initial requests.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Token that requests a cooperative stop of the whole batch.
    ///
    /// Streaming workers pause at their next chunk boundary and flush
    /// checkpoints; `run()` then returns normally with partial statistics.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// The live credential store shared with workers.
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Runs the batch to completion and returns final statistics.
    ///
    /// Individual transfer failures do NOT cause this method to error; they
    /// are recorded on the tasks and counted in the statistics.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Template`] when the template URL cannot be
    /// parsed, or [`EngineError::OutputDir`] when the output directory
    /// cannot be created.
    #[instrument(skip(self), fields(output_dir = %self.config.output_dir.display()))]
    pub async fn run(&self) -> Result<BatchStats, EngineError> {
        let template = BatchTemplate::parse(&self.config.template_url)?;

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|source| EngineError::OutputDir {
                path: self.config.output_dir.clone(),
                source,
            })?;

        let stats = Arc::new(BatchStats::new());
        let mut first_round = true;
        let mut auth_warning_sent = false;

        loop {
            let tasks = self.build_task_list(&template, first_round, &stats).await;
            if first_round {
                stats.set_total(tasks.len());
                first_round = false;
            }
            if tasks.is_empty() {
                info!("no files left to download");
                break;
            }

            info!(
                tasks = tasks.len(),
                parallelism = self.config.parallelism,
                "dispatching round"
            );

            let auth_failed = self
                .run_round(tasks, &stats, &mut auth_warning_sent)
                .await;

            if self.stop.is_cancelled() {
                info!("stop requested, ending batch");
                break;
            }

            if !auth_failed {
                break;
            }

            self.notifier.send(&Notification::new(
                EventKind::AuthExpired,
                "Authentication Expired",
                "Session has expired. Provide a fresh cookie to continue.",
            ));

            let Some(hook) = self.hooks.on_auth_expired.clone() else {
                info!("no auth refresh hook installed, ending batch");
                break;
            };
            // The hook may block on operator input; the pool is fully
            // drained before this point, so nothing overlaps with it.
            let refreshed = tokio::task::spawn_blocking(move || hook())
                .await
                .ok()
                .flatten();

            match refreshed {
                Some(cookie) => {
                    self.credentials.swap(cookie);
                    auth_warning_sent = false;
                    info!("credential refreshed, rebuilding remaining task list");
                }
                None => {
                    info!("no new credential provided, ending batch");
                    break;
                }
            }
        }

        if stats.completed() > 0 {
            self.notifier.send(&Notification::new(
                EventKind::BatchComplete,
                "Downloads Complete",
                format!(
                    "{} files downloaded, {} failed",
                    stats.completed(),
                    stats.failed()
                ),
            ));
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            bytes = stats.bytes_downloaded(),
            "batch finished"
        );

        // All workers are joined, so this Arc should be unique. If it is
        // not, fall back to copying the counters.
        match Arc::try_unwrap(stats) {
            Ok(stats) => Ok(stats),
            Err(shared) => {
                let copied = BatchStats::new();
                copied.set_total(shared.total());
                copied
                    .completed
                    .store(shared.completed(), Ordering::SeqCst);
                copied.failed.store(shared.failed(), Ordering::SeqCst);
                copied.skipped.store(shared.skipped(), Ordering::SeqCst);
                copied
                    .bytes_downloaded
                    .store(shared.bytes_downloaded(), Ordering::SeqCst);
                Ok(copied)
            }
        }
    }

    /// Dispatches one round of tasks and drains the pool.
    ///
    /// Returns true when any worker reported a credential failure.
    async fn run_round(
        &self,
        tasks: Vec<TransferTask>,
        stats: &Arc<BatchStats>,
        auth_warning_sent: &mut bool,
    ) -> bool {
        let round_cancel = self.stop.child_token();
        let options = TransferOptions {
            resume_enabled: self.config.resume_enabled,
            verify_enabled: self.config.verify_enabled,
        };

        let mut join_set: JoinSet<TransferTask> = JoinSet::new();
        for task in tasks {
            let worker = TransferWorker::new(
                self.client.clone(),
                Arc::clone(&self.credentials),
                Arc::clone(&self.limiter),
                Arc::clone(stats),
                self.retry_policy.clone(),
                options,
                round_cancel.clone(),
                self.hooks.on_progress.clone(),
            );
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = round_cancel.clone();
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return task;
                };
                // Halted before this task started: leave it undispatched.
                if cancel.is_cancelled() {
                    return task;
                }
                worker.run(task).await
            });
        }

        let mut auth_failed = false;
        while let Some(joined) = join_set.join_next().await {
            let task = match joined {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, "transfer task panicked");
                    stats.increment_failed();
                    continue;
                }
            };

            match task.status {
                TaskStatus::Complete => {
                    stats.increment_completed();
                    info!(filename = %task.filename, "file complete");

                    if !*auth_warning_sent && self.credentials.nearing_expiry() {
                        *auth_warning_sent = true;
                        let minutes = self.credentials.estimated_remaining().as_secs() / 60;
                        warn!(minutes_remaining = minutes, "session nearing expiry");
                        self.notifier.send(&Notification::new(
                            EventKind::AuthWarning,
                            "Session Expiring Soon",
                            format!("Session may expire in ~{minutes} minutes"),
                        ));
                    }
                }
                TaskStatus::Failed if task.auth_failure => {
                    warn!(
                        filename = %task.filename,
                        error = task.error.as_deref().unwrap_or("unknown"),
                        "systemic authentication failure, halting round"
                    );
                    if !auth_failed {
                        auth_failed = true;
                        round_cancel.cancel();
                    }
                }
                TaskStatus::Failed => {
                    stats.increment_failed();
                    warn!(
                        filename = %task.filename,
                        error = task.error.as_deref().unwrap_or("unknown"),
                        "file failed"
                    );
                }
                TaskStatus::Paused => {
                    info!(filename = %task.filename, "file paused");
                }
                TaskStatus::Pending | TaskStatus::Downloading => {
                    debug!(filename = %task.filename, "task not dispatched this round");
                }
            }
        }

        auth_failed
    }

    /// Builds the task list from the sequencer and on-disk state.
    ///
    /// Files already present and valid are excluded; invalid ones are
    /// deleted for re-fetch; checkpointed partials are rehydrated for
    /// resume. Skips are only counted into the statistics on the first
    /// round, so a post-refresh rebuild does not re-count completed work.
    async fn build_task_list(
        &self,
        template: &BatchTemplate,
        count_skips: bool,
        stats: &Arc<BatchStats>,
    ) -> Vec<TransferTask> {
        let mut tasks = Vec::new();
        let mut skipped = 0usize;

        for index in 1..=self.config.file_count {
            let mut task = TransferTask::new(
                template.filename_for(index),
                template.url_for(index),
                &self.config.output_dir,
            );

            if tokio::fs::metadata(&task.output_path).await.is_ok() {
                if self.config.verify_enabled {
                    let path = task.output_path.clone();
                    let verified = tokio::task::spawn_blocking(move || verify_archive(&path)).await;
                    match verified {
                        Ok(Ok(())) => {
                            skipped += 1;
                            // A checkpoint beside a valid final file is stale.
                            Checkpoint::clear(&task.output_path).await;
                            continue;
                        }
                        Ok(Err(e)) => {
                            info!(
                                filename = %task.filename,
                                error = %e,
                                "existing file fails verification, re-fetching"
                            );
                            let _ = tokio::fs::remove_file(&task.output_path).await;
                        }
                        Err(e) => {
                            warn!(
                                filename = %task.filename,
                                error = %e,
                                "verification did not run, re-fetching"
                            );
                            let _ = tokio::fs::remove_file(&task.output_path).await;
                        }
                    }
                } else {
                    skipped += 1;
                    Checkpoint::clear(&task.output_path).await;
                    continue;
                }
            }

            if self.config.resume_enabled
                && tokio::fs::metadata(task.partial_path()).await.is_ok()
            {
                if let Some(checkpoint) = Checkpoint::load(&task.output_path).await {
                    // Keep the freshly sequenced URL: a stored one may carry
                    // an outdated query signature.
                    task.downloaded_bytes = checkpoint.downloaded_bytes;
                    task.total_bytes = checkpoint.total_bytes;
                    task.started_at = checkpoint.started_at_time();
                    task.status = TaskStatus::Paused;
                    info!(
                        filename = %task.filename,
                        resumed_bytes = checkpoint.downloaded_bytes,
                        "resuming from checkpoint"
                    );
                }
            }

            tasks.push(task);
        }

        if count_skips {
            stats.add_skipped(skipped);
        }
        info!(tasks = tasks.len(), skipped, "task list built");
        tasks
    }
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
