//! Transfer worker: one resumable, verified, rate-limited fetch.
//!
//! A worker takes one [`TransferTask`] end-to-end and returns it in a
//! terminal state (`Complete`, `Failed`, or `Paused`). Along the way it
//! streams the body to a `.partial` file, honors the shared throughput
//! ceiling before every write, checkpoints progress at a fixed byte cadence,
//! and watches for the shapes an expired session takes: an HTML body, a
//! wrong leading signature, or an implausibly small total size.
//!
//! Cancellation is cooperative. The token is checked between chunks only; a
//! worker mid-read always finishes that read, flushes a checkpoint, and
//! returns `Paused`, so a stop never loses confirmed bytes.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, COOKIE, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::CredentialStore;

use super::checkpoint::Checkpoint;
use super::constants::{
    ARCHIVE_SIGNATURE, CHECKPOINT_INTERVAL_BYTES, HTML_PREVIEW_BYTES, MIN_PLAUSIBLE_TOTAL_BYTES,
};
use super::engine::BatchStats;
use super::error::DownloadError;
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error, parse_retry_after};
use super::task::{TaskStatus, TransferTask};
use super::throughput::ThroughputLimiter;
use super::verify::verify_archive;

/// Body substrings that identify a login interstitial.
const LOGIN_MARKERS: &[&str] = &["signin", "login", "accounts.google"];

/// Progress observer invoked after each chunk write.
///
/// The consumer decides display/log cadence; the hook itself must be cheap.
pub type ProgressHook = Arc<dyn Fn(&TransferTask) + Send + Sync>;

/// Behavior toggles a worker inherits from the batch configuration.
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Resume partial transfers from their checkpointed offset.
    pub resume_enabled: bool,
    /// Structurally verify completed archives.
    pub verify_enabled: bool,
}

/// Performs one resumable, verified, rate-limited fetch of one file.
///
/// Cheap to clone: the client, credential store, limiter, and statistics
/// are shared by reference with the whole batch.
#[derive(Clone)]
pub struct TransferWorker {
    client: Client,
    credentials: Arc<CredentialStore>,
    limiter: Arc<ThroughputLimiter>,
    stats: Arc<BatchStats>,
    retry_policy: RetryPolicy,
    options: TransferOptions,
    cancel: CancellationToken,
    on_progress: Option<ProgressHook>,
}

impl TransferWorker {
    /// Creates a worker wired to the batch's shared state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        credentials: Arc<CredentialStore>,
        limiter: Arc<ThroughputLimiter>,
        stats: Arc<BatchStats>,
        retry_policy: RetryPolicy,
        options: TransferOptions,
        cancel: CancellationToken,
        on_progress: Option<ProgressHook>,
    ) -> Self {
        Self {
            client,
            credentials,
            limiter,
            stats,
            retry_policy,
            options,
            cancel,
            on_progress,
        }
    }

    /// Runs one task to a terminal state.
    #[instrument(skip(self, task), fields(filename = %task.filename))]
    pub async fn run(&self, mut task: TransferTask) -> TransferTask {
        let partial_path = task.partial_path();

        let mut resume_from = if self.options.resume_enabled && task.downloaded_bytes > 0 {
            prepare_partial(&partial_path, task.downloaded_bytes).await
        } else {
            0
        };
        if resume_from == 0 {
            task.downloaded_bytes = 0;
        } else {
            info!(offset = resume_from, "resuming from checkpointed offset");
        }

        let response = match self.send_initial_request(&task.url, resume_from).await {
            Ok(response) => response,
            Err(error) => return self.fail_transport(task, &error).await,
        };

        // 416 means the range request started at or past the end: the
        // partial already holds the whole body.
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return promote_partial(task).await;
        }

        // An HTML body is never an archive; it is the expired-session page
        // served with a 200.
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if content_type.contains("text/html") {
            let preview = read_preview(response).await;
            let detail = if looks_like_login(&preview) {
                "authentication failed: redirected to login page"
            } else {
                "authentication failed: got HTML instead of an archive"
            };
            return self.fail_auth(task, detail).await;
        }

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && resume_from > 0 {
            // Server ignored the range request; start over from scratch.
            debug!("range request not honored, restarting transfer");
            resume_from = 0;
            task.downloaded_bytes = 0;
        }

        task.total_bytes = if status == StatusCode::PARTIAL_CONTENT {
            content_range_total(&response).unwrap_or(0)
        } else {
            response.content_length().unwrap_or(0) + resume_from
        };

        if task.total_bytes < MIN_PLAUSIBLE_TOTAL_BYTES {
            let detail = format!(
                "implausibly small archive ({} bytes reported), session likely expired",
                task.total_bytes
            );
            return self.fail_auth(task, detail).await;
        }

        task.status = TaskStatus::Downloading;
        if task.started_at.is_none() {
            task.started_at = Some(SystemTime::now());
        }

        if let Some(parent) = task.output_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let error = DownloadError::io(parent.to_path_buf(), e);
                return self.fail_transport(task, &error).await;
            }
        }

        let open_result = if resume_from > 0 {
            tokio::fs::OpenOptions::new()
                .append(true)
                .open(&partial_path)
                .await
        } else {
            tokio::fs::File::create(&partial_path).await
        };
        let mut file = match open_result {
            Ok(file) => file,
            Err(e) => {
                return self
                    .fail_transport(task, &DownloadError::io(partial_path, e))
                    .await;
            }
        };

        let mut stream = response.bytes_stream();
        let mut first_chunk = resume_from == 0;
        let mut bytes_since_checkpoint: u64 = 0;

        loop {
            // Cooperative stop: observed between chunks only.
            if self.cancel.is_cancelled() {
                if let Err(e) = file.flush().await {
                    let error = DownloadError::io(task.partial_path(), e);
                    return self.fail_stream(task, &error).await;
                }
                if self.options.resume_enabled && task.downloaded_bytes > 0 {
                    if let Err(e) = Checkpoint::for_task(&task).save(&task.output_path).await {
                        warn!(error = %e, "cannot flush checkpoint on pause");
                    }
                }
                info!(
                    downloaded_bytes = task.downloaded_bytes,
                    "stop observed, transfer paused"
                );
                task.status = TaskStatus::Paused;
                return task;
            }

            let Some(next) = stream.next().await else {
                break;
            };
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = file.flush().await;
                    let error = DownloadError::network(task.url.clone(), e);
                    return self.fail_stream(task, &error).await;
                }
            };
            if chunk.is_empty() {
                continue;
            }

            // The very first bytes of a fresh body must carry the archive
            // signature; the remote returns a 200 HTML page for expired
            // sessions regardless of content type games.
            if first_chunk {
                first_chunk = false;
                if !chunk.starts_with(ARCHIVE_SIGNATURE) {
                    drop(file);
                    let preview = preview_text(&chunk);
                    let detail = if looks_like_login(&preview) {
                        "authentication failed: redirected to login page"
                    } else {
                        "authentication failed: body does not start with archive signature"
                    };
                    return self.fail_auth(task, detail).await;
                }
            }

            self.limiter.admit(chunk.len() as u64).await;

            if let Err(e) = file.write_all(&chunk).await {
                let error = DownloadError::io(task.partial_path(), e);
                return self.fail_stream(task, &error).await;
            }

            task.downloaded_bytes += chunk.len() as u64;
            self.stats.add_bytes(chunk.len() as u64);
            bytes_since_checkpoint += chunk.len() as u64;

            if self.options.resume_enabled && bytes_since_checkpoint >= CHECKPOINT_INTERVAL_BYTES {
                bytes_since_checkpoint = 0;
                // Bytes must be durable before the checkpoint claims them.
                if file.flush().await.is_ok() {
                    if let Err(e) = Checkpoint::for_task(&task).save(&task.output_path).await {
                        warn!(error = %e, "periodic checkpoint flush failed");
                    }
                }
            }

            if let Some(hook) = &self.on_progress {
                hook(&task);
            }
        }

        if let Err(e) = file.flush().await {
            let error = DownloadError::io(task.partial_path(), e);
            return self.fail_stream(task, &error).await;
        }
        drop(file);

        if let Err(e) = tokio::fs::rename(&task.partial_path(), &task.output_path).await {
            let error = DownloadError::io(task.output_path.clone(), e);
            return self.fail_stream(task, &error).await;
        }
        Checkpoint::clear(&task.output_path).await;
        task.status = TaskStatus::Complete;

        if self.options.verify_enabled {
            let path = task.output_path.clone();
            let verified = tokio::task::spawn_blocking(move || verify_archive(&path)).await;
            match verified {
                Ok(Ok(())) => debug!("archive verified"),
                Ok(Err(e)) => {
                    warn!(error = %e, "verification failed, discarding output");
                    let _ = tokio::fs::remove_file(&task.output_path).await;
                    task.fail(format!("verification failed: {e}"));
                    return task;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&task.output_path).await;
                    task.fail(format!("verification did not run: {e}"));
                    return task;
                }
            }
        }

        info!(
            bytes = task.downloaded_bytes,
            total = task.total_bytes,
            "transfer complete"
        );
        task
    }

    /// Sends the initial GET, retrying transient failures per the policy.
    ///
    /// Success statuses and 416 come back as `Ok`; everything else maps to
    /// a [`DownloadError`] after retries are exhausted.
    async fn send_initial_request(
        &self,
        url: &str,
        resume_from: u64,
    ) -> Result<Response, DownloadError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut request = self
                .client
                .get(url)
                .header(COOKIE, self.credentials.get());
            if resume_from > 0 {
                request = request.header(RANGE, format!("bytes={resume_from}-"));
            }

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status == StatusCode::RANGE_NOT_SATISFIABLE {
                        return Ok(response);
                    }
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    DownloadError::http_status_with_retry_after(url, status.as_u16(), retry_after)
                }
                Err(e) if e.is_timeout() => DownloadError::timeout(url),
                Err(e) => DownloadError::network(url, e),
            };

            let failure_type = classify_error(&error);
            let retry_after_delay = if failure_type == FailureType::RateLimited {
                retry_after_of(&error)
            } else {
                None
            };

            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay: backoff_delay,
                    attempt: next_attempt,
                } => {
                    let delay = retry_after_delay.unwrap_or(backoff_delay);
                    info!(
                        url = %url,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        using_retry_after = retry_after_delay.is_some(),
                        error = %error,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, %reason, "not retrying request");
                    return Err(error);
                }
            }
        }
    }

    /// Records an ordinary transport failure on the task.
    ///
    /// With resume disabled the partial and checkpoint are removed so the
    /// next pass starts clean; with resume enabled both survive.
    async fn fail_transport(&self, mut task: TransferTask, error: &DownloadError) -> TransferTask {
        warn!(url = %task.url, error = %error, "transfer failed");
        if !self.options.resume_enabled {
            let _ = tokio::fs::remove_file(task.partial_path()).await;
            Checkpoint::clear(&task.output_path).await;
        }
        task.fail(error.to_string());
        task
    }

    /// Records a mid-stream failure, flushing a checkpoint first so the
    /// next attempt continues from the last confirmed offset.
    async fn fail_stream(&self, task: TransferTask, error: &DownloadError) -> TransferTask {
        if self.options.resume_enabled && task.downloaded_bytes > 0 {
            if let Err(e) = Checkpoint::for_task(&task).save(&task.output_path).await {
                warn!(error = %e, "cannot flush checkpoint after stream failure");
            }
        }
        self.fail_transport(task, error).await
    }

    /// Records a credential failure: the batch-wide halt signal.
    ///
    /// Range-resume is meaningless against a re-authenticated session, so
    /// the partial and its checkpoint are discarded.
    async fn fail_auth(&self, mut task: TransferTask, detail: impl Into<String>) -> TransferTask {
        let detail = detail.into();
        warn!(url = %task.url, detail = %detail, "credential rejected");
        let _ = tokio::fs::remove_file(task.partial_path()).await;
        Checkpoint::clear(&task.output_path).await;
        task.fail_auth(detail);
        task
    }
}

/// Reconciles the partial file with the checkpointed offset.
///
/// Returns the byte offset to resume from, or 0 for a fresh start. The
/// checkpoint only ever trails the file (bytes are flushed before the
/// record), so a longer partial is truncated back to the offset; a shorter
/// or missing one forces a fresh start.
async fn prepare_partial(partial_path: &Path, checkpointed: u64) -> u64 {
    let Ok(metadata) = tokio::fs::metadata(partial_path).await else {
        return 0;
    };
    let on_disk = metadata.len();

    if on_disk < checkpointed {
        warn!(
            on_disk,
            checkpointed, "partial file shorter than checkpoint, restarting"
        );
        return 0;
    }

    if on_disk > checkpointed {
        let truncated = match tokio::fs::OpenOptions::new()
            .write(true)
            .open(partial_path)
            .await
        {
            Ok(file) => file.set_len(checkpointed).await.is_ok(),
            Err(_) => false,
        };
        if !truncated {
            warn!("cannot truncate partial to checkpointed offset, restarting");
            return 0;
        }
        debug!(
            from = on_disk,
            to = checkpointed,
            "truncated partial past checkpointed offset"
        );
    }

    checkpointed
}

/// Promotes an already-complete partial to its final name (416 path).
async fn promote_partial(mut task: TransferTask) -> TransferTask {
    let partial_path = task.partial_path();
    if tokio::fs::metadata(&partial_path).await.is_ok() {
        if let Err(e) = tokio::fs::rename(&partial_path, &task.output_path).await {
            task.fail(DownloadError::io(task.output_path.clone(), e).to_string());
            return task;
        }
    }
    Checkpoint::clear(&task.output_path).await;
    info!("range not satisfiable, partial promoted as complete");
    task.status = TaskStatus::Complete;
    task
}

/// Total size from a `Content-Range: bytes start-end/total` header.
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse().ok())
}

/// Reads up to the preview budget from a response body.
async fn read_preview(response: Response) -> String {
    let mut stream = response.bytes_stream();
    let mut buffer = Vec::with_capacity(HTML_PREVIEW_BYTES);
    while buffer.len() < HTML_PREVIEW_BYTES {
        match stream.next().await {
            Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buffer.truncate(HTML_PREVIEW_BYTES);
    String::from_utf8_lossy(&buffer).to_lowercase()
}

/// Lossy lowercase preview of a body chunk.
fn preview_text(chunk: &[u8]) -> String {
    let end = chunk.len().min(HTML_PREVIEW_BYTES);
    String::from_utf8_lossy(&chunk[..end]).to_lowercase()
}

/// True when a body preview looks like a login interstitial.
fn looks_like_login(preview: &str) -> bool {
    LOGIN_MARKERS.iter().any(|marker| preview.contains(marker))
}

/// The Retry-After delay embedded in an HTTP status error, if any.
fn retry_after_of(error: &DownloadError) -> Option<std::time::Duration> {
    match error {
        DownloadError::HttpStatus {
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}
