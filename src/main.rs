//! CLI entry point for the takeout downloader.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use takeout_core::auth::curl;
use takeout_core::download::TransferTask;
use takeout_core::{DownloadConfig, DownloadEngine, EngineHooks};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("Takeout downloader starting");

    // Resolve cookie and URL: flags, environment, then cURL extraction.
    let Some(raw_cookie) = args
        .cookie
        .or_else(|| std::env::var("GOOGLE_COOKIE").ok())
    else {
        bail!("cookie is required: pass --cookie or set GOOGLE_COOKIE");
    };

    let url = args
        .url
        .or_else(|| std::env::var("TAKEOUT_URL").ok())
        .or_else(|| {
            let extracted = curl::extract_url(&raw_cookie);
            if extracted.is_some() {
                info!("auto-extracted URL from cURL command");
            }
            extracted
        });
    let Some(url) = url else {
        bail!("URL is required: pass --url or set TAKEOUT_URL");
    };

    let cookie = curl::extract_cookie(&raw_cookie);

    let output_dir = args
        .output
        .or_else(|| std::env::var("OUTPUT_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./downloads"));

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let speed_limit = (args.speed_limit.max(0.0) * 1024.0 * 1024.0) as u64;

    let config = DownloadConfig {
        template_url: url,
        cookie,
        output_dir,
        file_count: args.count,
        parallelism: usize::from(args.parallel),
        speed_limit,
        resume_enabled: !args.no_resume,
        verify_enabled: !args.no_verify,
    };

    info!(
        output_dir = %config.output_dir.display(),
        file_count = config.file_count,
        parallelism = config.parallelism,
        speed_limit_bytes = config.speed_limit,
        "configuration resolved"
    );

    let display = (!args.quiet).then(|| Arc::new(ProgressDisplay::new()));

    let hooks = EngineHooks {
        on_progress: display.as_ref().map(|display| {
            let display = Arc::clone(display);
            let hook: takeout_core::download::ProgressHook =
                Arc::new(move |task: &TransferTask| display.observe(task));
            hook
        }),
        on_auth_expired: Some(Arc::new(prompt_for_refreshed_cookie)),
    };

    let engine = DownloadEngine::new(config, hooks)?;

    // First Ctrl-C requests a cooperative stop; workers flush checkpoints
    // and the run returns with partial statistics.
    let stop = engine.stop_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after current chunks");
            stop.cancel();
        }
    });

    let stats = engine.run().await?;

    if let Some(display) = display {
        display.clear();
    }

    let gigabytes = stats.bytes_downloaded() as f64 / (1024.0 * 1024.0 * 1024.0);
    let minutes = stats.elapsed().as_secs_f64() / 60.0;
    let mean_mbps = stats.throughput() / (1024.0 * 1024.0);
    info!(
        completed = stats.completed(),
        failed = stats.failed(),
        skipped = stats.skipped(),
        downloaded_gb = %format!("{gigabytes:.2}"),
        elapsed_min = %format!("{minutes:.1}"),
        mean_mb_per_sec = %format!("{mean_mbps:.1}"),
        "batch complete"
    );

    Ok(())
}

/// Per-file progress bars driven from the engine's progress hook.
struct ProgressDisplay {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ProgressDisplay {
    fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn observe(&self, task: &TransferTask) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = bars.entry(task.filename.clone()).or_insert_with(|| {
            let bar = self.multi.add(ProgressBar::new(task.total_bytes.max(1)));
            let style = ProgressStyle::with_template(
                "{msg:30} {bar:30} {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar.set_message(task.filename.clone());
            bar
        });
        if task.total_bytes > 0 {
            bar.set_length(task.total_bytes);
        }
        bar.set_position(task.downloaded_bytes);
        if task.total_bytes > 0 && task.downloaded_bytes >= task.total_bytes {
            bar.finish();
        }
    }

    fn clear(&self) {
        let _ = self.multi.clear();
    }
}

/// Prompts the operator for a fresh session, pasted as a cURL command.
///
/// Runs on a blocking thread with the worker pool fully drained. Reads
/// until a line without a trailing backslash; `q` aborts.
fn prompt_for_refreshed_cookie() -> Option<String> {
    let mut err = io::stderr();
    let _ = writeln!(err);
    let _ = writeln!(err, "============================================================");
    let _ = writeln!(err, "AUTHENTICATION EXPIRED");
    let _ = writeln!(err, "============================================================");
    let _ = writeln!(err, "To get a fresh cookie:");
    let _ = writeln!(err, "  1. Open devtools (F12) on the takeout page");
    let _ = writeln!(err, "  2. Go to the Network tab and click a download link");
    let _ = writeln!(err, "  3. Right-click the request -> Copy -> Copy as cURL");
    let _ = writeln!(err, "Paste the cURL command below (or 'q' to quit):");
    let _ = writeln!(err, "------------------------------------------------------------");

    let stdin = io::stdin();
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let trimmed = line.trim_end();
        if lines.is_empty() && trimmed.eq_ignore_ascii_case("q") {
            return None;
        }
        lines.push(trimmed.trim_end_matches('\\').to_string());
        if !trimmed.ends_with('\\') {
            break;
        }
    }

    let pasted = lines.join(" ");
    if pasted.trim().is_empty() {
        return None;
    }

    let cookie = curl::extract_cookie(&pasted);
    if cookie.is_empty() {
        let _ = writeln!(io::stderr(), "could not extract a cookie from the input");
        None
    } else {
        let _ = writeln!(io::stderr(), "extracted cookie ({} chars)", cookie.len());
        Some(cookie)
    }
}
