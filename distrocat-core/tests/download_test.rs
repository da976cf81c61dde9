//! Download engine behaviour through the catalog manager

mod common;

use common::{init_test_logging, open_manager, payload, staging_files, template, FixtureServer, Route};
use distrocat_core::hasher::hash_bytes;
use distrocat_core::{CatalogError, CatalogManager, DownloadOptions, ErrorKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn slow_route(len: usize) -> Route {
    Route::Slow {
        body: payload(len),
        chunk: 4096,
        delay: Duration::from_millis(20),
    }
}

async fn wait_until_downloading(manager: &CatalogManager, name: &str) {
    for _ in 0..200 {
        if manager.is_downloading(name) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("download of {name} never started");
}

#[tokio::test]
async fn test_download_verifies_and_publishes() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let body = payload(200 * 1024);
    server.route("/alpine.tar.gz", Route::Full(body.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("alpine", &server.url("/alpine.tar.gz")).with_sha256(hash_bytes(&body))],
    );

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let options = DownloadOptions::new().on_progress(move |p| sink.lock().unwrap().push(p));

    let descriptor = manager.download("alpine", options).await.unwrap();

    let artifact = dir.path().join("distros").join("alpine.tar.gz");
    assert!(descriptor.available);
    assert_eq!(descriptor.local_file_path.as_deref(), Some(artifact.as_path()));
    assert_eq!(descriptor.size_bytes, Some(body.len() as u64));
    assert_eq!(std::fs::read(&artifact).unwrap(), body);
    assert!(manager.is_available("alpine"));
    assert!(!manager.is_downloading("alpine"));
    assert!(staging_files(dir.path()).is_empty());

    let reports = reports.lock().unwrap();
    let last = reports.last().unwrap();
    assert_eq!(last.downloaded_bytes, body.len() as u64);
    assert_eq!(last.total_bytes, Some(body.len() as u64));

    // Persisted, so a fresh manager sees it too
    drop(manager);
    let reopened = open_manager(dir.path(), vec![template("alpine", "http://unused")]);
    let reloaded = reopened.get_template("alpine").unwrap();
    assert!(reloaded.available);
    assert_eq!(reloaded.sha256, Some(hash_bytes(&body)));
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_nothing_behind() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/image.tar.gz", Route::Full(payload(64 * 1024)));

    let dir = TempDir::new().unwrap();
    let wrong = "0".repeat(64);
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz")).with_sha256(wrong.clone())],
    );

    let err = manager
        .download("image", DownloadOptions::new())
        .await
        .unwrap_err();

    match err {
        CatalogError::ChecksumMismatch {
            name,
            expected,
            actual,
        } => {
            assert_eq!(name, "image");
            assert_eq!(expected, wrong);
            assert_eq!(actual, hash_bytes(&payload(64 * 1024)));
        }
        other => panic!("expected ChecksumMismatch, got {other:?}"),
    }

    assert!(!dir.path().join("distros/image.tar.gz").exists());
    assert!(staging_files(dir.path()).is_empty());

    let descriptor = manager.get_template("image").unwrap();
    assert!(!descriptor.available);
    assert_eq!(descriptor.sha256, Some(wrong));
}

#[tokio::test]
async fn test_explicit_checksum_overrides_descriptor() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let body = payload(10 * 1024);
    server.route("/image.tar.gz", Route::Full(body.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz")).with_sha256("0".repeat(64))],
    );

    let options = DownloadOptions::new()
        .expected_checksum(format!("sha256:{}", hash_bytes(&body).to_uppercase()));
    let descriptor = manager.download("image", options).await.unwrap();
    assert_eq!(descriptor.sha256, Some(hash_bytes(&body)));
}

#[tokio::test]
async fn test_unverified_download_records_computed_hash() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let body = payload(32 * 1024);
    server.route("/image.tar.gz", Route::Full(body.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz"))],
    );

    let descriptor = manager
        .download("image", DownloadOptions::new().verify_checksum(false))
        .await
        .unwrap();
    assert_eq!(descriptor.sha256, Some(hash_bytes(&body)));
    assert!(manager.verify_template("image").await);
}

#[tokio::test]
async fn test_cancel_removes_partial_file() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/slow.tar.gz", slow_route(512 * 1024));

    let dir = TempDir::new().unwrap();
    let manager = Arc::new(open_manager(
        dir.path(),
        vec![template("slow", &server.url("/slow.tar.gz"))],
    ));

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.download("slow", DownloadOptions::new()).await })
    };

    wait_until_downloading(&manager, "slow").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.cancel_download("slow"));

    let err = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancelled download should finish promptly")
        .unwrap()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.is_cancellation());
    assert!(!manager.is_downloading("slow"));
    assert!(!manager.cancel_download("slow"));
    assert!(!dir.path().join("distros/slow.tar.gz").exists());
    assert!(staging_files(dir.path()).is_empty());
    assert!(!manager.get_template("slow").unwrap().available);
}

#[tokio::test]
async fn test_timeout_removes_partial_file() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/slow.tar.gz", slow_route(512 * 1024));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("slow", &server.url("/slow.tar.gz"))],
    );

    let err = manager
        .download(
            "slow",
            DownloadOptions::new().timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    match err {
        CatalogError::TimedOut { name, after } => {
            assert_eq!(name, "slow");
            assert_eq!(after, Duration::from_millis(200));
        }
        other => panic!("expected TimedOut, got {other:?}"),
    }
    assert!(!dir.path().join("distros/slow.tar.gz").exists());
    assert!(staging_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_redirects_are_followed() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let body = payload(8 * 1024);
    server.route("/start", Route::Redirect("/middle".to_string()));
    server.route("/middle", Route::Redirect(server.url("/final.tar.gz")));
    server.route("/final.tar.gz", Route::Full(body.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(dir.path(), vec![template("hop", &server.url("/start"))]);

    manager.download("hop", DownloadOptions::new()).await.unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("distros/hop.tar.gz")).unwrap(),
        body
    );
    assert_eq!(server.hits("/final.tar.gz"), 1);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/loop", Route::Redirect("/loop".to_string()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(dir.path(), vec![template("loop", &server.url("/loop"))]);

    let err = manager
        .download("loop", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.to_string().contains("too many redirects"));
    // The first request plus five redirect hops
    assert_eq!(server.hits("/loop"), 6);
}

#[tokio::test]
async fn test_http_error_status_is_network_error() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/gone.tar.gz", Route::Status(404));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("gone", &server.url("/gone.tar.gz"))],
    );

    let err = manager
        .download("gone", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_same_name_download_is_rejected_while_in_flight() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/slow.tar.gz", slow_route(512 * 1024));

    let dir = TempDir::new().unwrap();
    let manager = Arc::new(open_manager(
        dir.path(),
        vec![template("slow", &server.url("/slow.tar.gz"))],
    ));

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.download("slow", DownloadOptions::new()).await })
    };
    wait_until_downloading(&manager, "slow").await;

    let second = manager
        .download("slow", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(second.kind(), ErrorKind::AlreadyInProgress);

    let removal = manager.remove_template("slow").unwrap_err();
    assert_eq!(removal.kind(), ErrorKind::AlreadyInProgress);

    manager.cancel_download("slow");
    let first = first.await.unwrap().unwrap_err();
    assert_eq!(first.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_failed_redownload_keeps_previous_artifact() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let original = payload(64 * 1024);
    server.route("/image.tar.gz", Route::Full(original.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz"))],
    );
    manager
        .download("image", DownloadOptions::new())
        .await
        .unwrap();

    let err = manager
        .download("image", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyAvailable);

    server.route(
        "/image.tar.gz",
        Route::Truncated {
            body: payload(128 * 1024),
            send: 16 * 1024,
        },
    );
    let err = manager
        .download("image", DownloadOptions::new().overwrite(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Network);

    assert_eq!(
        std::fs::read(dir.path().join("distros/image.tar.gz")).unwrap(),
        original
    );
    assert!(staging_files(dir.path()).is_empty());
    assert!(manager.verify_template("image").await);
}

#[tokio::test]
async fn test_download_precondition_errors() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![distrocat_core::TemplateDescriptor::new("local-only", "Local Only")],
    );

    let err = manager
        .download("missing", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = manager
        .download("local-only", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSourceUrl);
    assert!(!manager.is_downloading("local-only"));

    let err = manager
        .download("../escape", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidName);
}

#[tokio::test]
async fn test_unrepresentable_timeout_means_no_deadline() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let body = payload(4 * 1024);
    server.route("/image.tar.gz", Route::Full(body.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz"))],
    );

    let options = DownloadOptions::new().timeout(Duration::from_secs(u64::MAX));
    let descriptor = manager.download("image", options).await.unwrap();
    assert_eq!(descriptor.size_bytes, Some(body.len() as u64));
}

#[tokio::test]
async fn test_artifact_keeps_source_archive_extension() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let body = payload(8 * 1024);
    server.route("/rootfs.tar.xz", Route::Full(body.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("debian", &server.url("/rootfs.tar.xz"))],
    );

    let descriptor = manager.download("debian", DownloadOptions::new()).await.unwrap();
    let artifact = dir.path().join("distros/debian.tar.xz");
    assert_eq!(descriptor.local_file_path.as_deref(), Some(artifact.as_path()));
    assert_eq!(std::fs::read(&artifact).unwrap(), body);
    assert!(!dir.path().join("distros/debian.tar.gz").exists());
    assert_eq!(manager.get_local_path("debian"), Some(artifact));
}

/// Replaces `catalog.json` with a directory so the next save fails
fn break_catalog_file(root: &std::path::Path) {
    let catalog = root.join("catalog.json");
    std::fs::remove_file(&catalog).unwrap();
    std::fs::create_dir(&catalog).unwrap();
}

#[tokio::test]
async fn test_failed_save_publishes_nothing() {
    init_test_logging();
    let server = FixtureServer::start().await;
    server.route("/image.tar.gz", Route::Full(payload(16 * 1024)));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz"))],
    );
    break_catalog_file(dir.path());

    let err = manager
        .download("image", DownloadOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(!dir.path().join("distros/image.tar.gz").exists());
    assert!(!manager.is_available("image"));
    assert!(!manager.is_downloading("image"));
    assert!(staging_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_failed_save_on_overwrite_keeps_previous_artifact() {
    init_test_logging();
    let server = FixtureServer::start().await;
    let original = payload(16 * 1024);
    server.route("/image.tar.gz", Route::Full(original.clone()));

    let dir = TempDir::new().unwrap();
    let manager = open_manager(
        dir.path(),
        vec![template("image", &server.url("/image.tar.gz"))],
    );
    manager
        .download("image", DownloadOptions::new())
        .await
        .unwrap();

    server.route("/image.tar.gz", Route::Full(payload(32 * 1024)));
    break_catalog_file(dir.path());

    // The recorded hash belongs to the old content
    let options = DownloadOptions::new().overwrite(true).verify_checksum(false);
    let err = manager
        .download("image", options)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(
        std::fs::read(dir.path().join("distros/image.tar.gz")).unwrap(),
        original
    );
    assert_eq!(
        manager.get_template("image").unwrap().size_bytes,
        Some(original.len() as u64)
    );
    assert!(staging_files(dir.path()).is_empty());
}
