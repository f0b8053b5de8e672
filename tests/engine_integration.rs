//! Integration tests for the batch coordinator.
//!
//! These tests drive the full engine against a wiremock server: sequencing,
//! skip detection, verification demotion, expired-session classification,
//! and mid-batch credential rotation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use takeout_core::{DownloadConfig, DownloadEngine, EngineHooks, RetryPolicy};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::{RecordingSink, large_archive};

/// Engine config pointed at the mock server's batch.
fn test_config(server: &MockServer, output_dir: &TempDir, file_count: u32) -> DownloadConfig {
    DownloadConfig {
        template_url: format!("{}/takeout-1-001.zip", server.uri()),
        cookie: "SID=test".to_string(),
        output_dir: output_dir.path().to_path_buf(),
        file_count,
        parallelism: 4,
        speed_limit: 0,
        resume_enabled: true,
        verify_enabled: true,
    }
}

/// Engine with no retries, so failure tests stay fast.
fn engine_no_retry(config: DownloadConfig) -> DownloadEngine {
    DownloadEngine::new(config, EngineHooks::default())
        .unwrap()
        .with_retry_policy(RetryPolicy::with_max_attempts(1))
}

#[tokio::test]
async fn test_batch_downloads_all_files() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    for index in 1..=3u8 {
        Mock::given(method("GET"))
            .and(path(format!("/takeout-1-00{index}.zip")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(index)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let engine = engine_no_retry(test_config(&server, &output_dir, 3));
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.total(), 3);
    assert_eq!(stats.completed(), 3);
    assert_eq!(stats.failed(), 0);
    assert_eq!(stats.skipped(), 0);

    for index in 1..=3u8 {
        let final_path = output_dir.path().join(format!("takeout-1-00{index}.zip"));
        assert_eq!(
            std::fs::read(&final_path).unwrap(),
            large_archive(index),
            "file {index} must be byte-identical to the served body"
        );
        assert!(
            !output_dir
                .path()
                .join(format!("takeout-1-00{index}.zip.partial"))
                .exists(),
            "no partial left behind"
        );
        assert!(
            !output_dir
                .path()
                .join(format!("takeout-1-00{index}.zip.progress"))
                .exists(),
            "no checkpoint left behind"
        );
    }
}

#[tokio::test]
async fn test_rerun_skips_existing_valid_files() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    // File 1 already downloaded and valid: it must never be re-fetched.
    std::fs::write(
        output_dir.path().join("takeout-1-001.zip"),
        large_archive(1),
    )
    .unwrap();
    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(1)))
        .expect(0)
        .mount(&server)
        .await;

    for index in 2..=3u8 {
        Mock::given(method("GET"))
            .and(path(format!("/takeout-1-00{index}.zip")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(index)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let engine = engine_no_retry(test_config(&server, &output_dir, 3));
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.skipped(), 1);
    assert_eq!(stats.completed(), 2);
    assert_eq!(stats.total(), 2);
}

#[tokio::test]
async fn test_rerun_refetches_file_failing_verification() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    // An existing file with a bad signature must be deleted and re-fetched.
    std::fs::write(
        output_dir.path().join("takeout-1-001.zip"),
        vec![0x20u8; 4096],
    )
    .unwrap();
    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(7)))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_no_retry(test_config(&server, &output_dir, 1));
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.skipped(), 0);
    assert_eq!(stats.completed(), 1);
    assert_eq!(
        std::fs::read(output_dir.path().join("takeout-1-001.zip")).unwrap(),
        large_archive(7)
    );
}

#[tokio::test]
async fn test_all_files_present_makes_empty_batch() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    for index in 1..=3u8 {
        std::fs::write(
            output_dir.path().join(format!("takeout-1-00{index}.zip")),
            large_archive(index),
        )
        .unwrap();
    }

    let engine = engine_no_retry(test_config(&server, &output_dir, 3));
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.total(), 0);
    assert_eq!(stats.completed(), 0);
    assert_eq!(stats.skipped(), 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_html_login_page_is_auth_failure_not_transport_error() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string("<html><body>Please sign in to continue: signin</body></html>"),
        )
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let engine = engine_no_retry(test_config(&server, &output_dir, 1))
        .with_notifier(Arc::clone(&sink) as Arc<dyn takeout_core::NotificationSink>);
    let stats = engine.run().await.unwrap();

    // A systemic auth failure is a batch signal, not a per-task failure.
    assert_eq!(stats.completed(), 0);
    assert_eq!(stats.failed(), 0);
    assert!(
        sink.events().contains(&"auth_expired".to_string()),
        "auth_expired must be emitted, got: {:?}",
        sink.events()
    );
    assert!(!output_dir.path().join("takeout-1-001.zip").exists());
}

#[tokio::test]
async fn test_implausibly_small_body_is_auth_failure() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    // A 10 KB response cannot be a takeout archive, whatever it claims.
    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(support::build_archive(1, 8_000)),
        )
        .mount(&server)
        .await;

    let sink = Arc::new(RecordingSink::new());
    let engine = engine_no_retry(test_config(&server, &output_dir, 1))
        .with_notifier(Arc::clone(&sink) as Arc<dyn takeout_core::NotificationSink>);
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.completed(), 0);
    assert!(sink.events().contains(&"auth_expired".to_string()));
}

#[tokio::test]
async fn test_auth_refresh_rotates_credential_and_resumes_batch() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    // The stale session gets login pages; the fresh one gets archives.
    for index in 1..=2u8 {
        Mock::given(method("GET"))
            .and(path(format!("/takeout-1-00{index}.zip")))
            .and(header("Cookie", "SID=old"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>signin required</body></html>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/takeout-1-00{index}.zip")))
            .and(header("Cookie", "SID=new"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(index)))
            .mount(&server)
            .await;
    }

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::clone(&refresh_calls);
    let hooks = EngineHooks {
        on_progress: None,
        on_auth_expired: Some(Arc::new(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            Some("SID=new".to_string())
        })),
    };

    let mut config = test_config(&server, &output_dir, 2);
    config.cookie = "SID=old".to_string();

    let sink = Arc::new(RecordingSink::new());
    let engine = DownloadEngine::new(config, hooks)
        .unwrap()
        .with_retry_policy(RetryPolicy::with_max_attempts(1))
        .with_notifier(Arc::clone(&sink) as Arc<dyn takeout_core::NotificationSink>);
    let stats = engine.run().await.unwrap();

    assert_eq!(
        refresh_calls.load(Ordering::SeqCst),
        1,
        "refresh hook must run exactly once, with the pool drained"
    );
    assert_eq!(stats.completed(), 2);
    for index in 1..=2u8 {
        assert_eq!(
            std::fs::read(output_dir.path().join(format!("takeout-1-00{index}.zip"))).unwrap(),
            large_archive(index)
        );
    }

    let events = sink.events();
    assert!(events.contains(&"auth_expired".to_string()));
    assert!(events.contains(&"complete".to_string()));
}

#[tokio::test]
async fn test_refresh_hook_returning_none_ends_batch() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=utf-8")
                .set_body_string("<html><body>signin</body></html>"),
        )
        .mount(&server)
        .await;

    let refresh_calls = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::clone(&refresh_calls);
    let hooks = EngineHooks {
        on_progress: None,
        on_auth_expired: Some(Arc::new(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            None
        })),
    };

    let engine = DownloadEngine::new(test_config(&server, &output_dir, 1), hooks)
        .unwrap()
        .with_retry_policy(RetryPolicy::with_max_attempts(1));
    let stats = engine.run().await.unwrap();

    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.completed(), 0);
}

#[tokio::test]
async fn test_verification_failure_demotes_and_deletes_output() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    // Carries the signature and a plausible size, but is not an archive.
    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(support::pseudo_body(1_500_000)))
        .mount(&server)
        .await;

    let engine = engine_no_retry(test_config(&server, &output_dir, 1));
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.completed(), 0);
    assert_eq!(stats.failed(), 1);
    assert!(
        !output_dir.path().join("takeout-1-001.zip").exists(),
        "output failing verification must be deleted for re-fetch"
    );
}

#[tokio::test]
async fn test_verify_disabled_keeps_unverifiable_output() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    let body = support::pseudo_body(1_500_000);
    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let mut config = test_config(&server, &output_dir, 1);
    config.verify_enabled = false;
    let engine = engine_no_retry(config);
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.completed(), 1);
    assert_eq!(
        std::fs::read(output_dir.path().join("takeout-1-001.zip")).unwrap(),
        body
    );
}

#[tokio::test]
async fn test_transport_failure_counts_without_aborting_siblings() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/takeout-1-002.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(2)))
        .mount(&server)
        .await;

    let engine = engine_no_retry(test_config(&server, &output_dir, 2));
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.completed(), 1, "sibling must finish despite the 404");
    assert_eq!(stats.failed(), 1);
}

#[tokio::test]
async fn test_stop_before_run_dispatches_nothing() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    let engine = engine_no_retry(test_config(&server, &output_dir, 3));
    engine.stop_token().cancel();
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.completed(), 0);
    assert_eq!(stats.failed(), 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_progress_hook_observes_chunks() {
    let server = MockServer::start().await;
    let output_dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/takeout-1-001.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(large_archive(3)))
        .mount(&server)
        .await;

    let observed = Arc::new(AtomicUsize::new(0));
    let hook_observed = Arc::clone(&observed);
    let hooks = EngineHooks {
        on_progress: Some(Arc::new(
            move |task: &takeout_core::download::TransferTask| {
                assert!(task.downloaded_bytes <= task.total_bytes);
                hook_observed.fetch_add(1, Ordering::SeqCst);
            },
        )),
        on_auth_expired: None,
    };

    let engine = DownloadEngine::new(test_config(&server, &output_dir, 1), hooks).unwrap();
    let stats = engine.run().await.unwrap();

    assert_eq!(stats.completed(), 1);
    assert!(
        observed.load(Ordering::SeqCst) > 0,
        "progress hook must fire at least once per chunk"
    );
}
