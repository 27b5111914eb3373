#![cfg(unix)]

use hytale_panel::config::DownloadConfig;
use hytale_panel::download::{DownloadState, HytaleDownloader};
use hytale_panel::error::{Error, Result};
use hytale_panel::events::{EventBus, PanelEvent};
use hytale_panel::server::files::{ASSETS_ARCHIVE, SERVER_JAR};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    events: EventBus,
    downloader: HytaleDownloader,
}

/// Build a game archive with both artifacts nested one level deep, the way
/// the real distribution ships them.
fn write_game_zip(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    zip.add_directory("Server/", options).unwrap();
    zip.start_file(format!("Server/{}", SERVER_JAR), options).unwrap();
    zip.write_all(b"server jar bytes").unwrap();
    zip.start_file(ASSETS_ARCHIVE, options).unwrap();
    zip.write_all(b"asset bytes").unwrap();
    zip.finish().unwrap();
}

fn write_helper(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-downloader.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A downloader whose helper runs `body` with `$2` set to the archive path
/// and `$GAME_ZIP` pointing at a prebuilt archive.
fn fixture(body: &str, helper_timeout_ms: u64) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let game_zip = dir.path().join("prebuilt.zip");
    write_game_zip(&game_zip);

    let body = body.replace("$GAME_ZIP", &game_zip.display().to_string());
    let helper = write_helper(dir.path(), &body);

    let events = EventBus::default();
    let downloader = HytaleDownloader::new(
        DownloadConfig {
            cache_dir: dir.path().join("cache"),
            work_dir: dir.path().join("work"),
            helper_path: Some(helper),
            helper_timeout_ms,
            ..DownloadConfig::default()
        },
        events.clone(),
    );

    Fixture {
        dir,
        events,
        downloader,
    }
}

const HAPPY_HELPER: &str = r#"
echo "Please visit https://oauth.accounts.hytale.com/oauth2/device/verify?user_code=ABCD-1234"
echo "Please visit https://oauth.accounts.hytale.com/oauth2/device/verify?user_code=ABCD-1234"
echo "Authorized. Downloading server files"
echo "Progress: 50%"
cp "$GAME_ZIP" "$2"
echo "Progress: 100%"
exit 0
"#;

#[tokio::test]
async fn test_download_populates_cache() -> Result<()> {
    let f = fixture(HAPPY_HELPER, 30_000);
    assert!(!f.downloader.is_cached());

    let cache = f.downloader.ensure_cache_ready().await?;
    assert_eq!(cache, f.dir.path().join("cache"));
    assert_eq!(std::fs::read(cache.join(SERVER_JAR))?, b"server jar bytes");
    assert_eq!(std::fs::read(cache.join(ASSETS_ARCHIVE))?, b"asset bytes");
    assert!(f.downloader.is_cached());
    assert_eq!(f.downloader.state(), DownloadState::Complete);

    let events = f.events.recent(None);
    let urls: Vec<&PanelEvent> = events
        .iter()
        .filter(|e| matches!(e, PanelEvent::HytaleOauthUrl { .. }))
        .collect();
    assert_eq!(urls.len(), 1);
    assert!(events.contains(&PanelEvent::HytaleOauthCode {
        code: "ABCD-1234".to_string()
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        PanelEvent::HytaleProgress { percent: Some(p), .. } if *p == 50.0
    )));
    assert!(matches!(
        events.last(),
        Some(PanelEvent::HytaleComplete { .. })
    ));

    let session = f.downloader.session().expect("session recorded");
    assert_eq!(
        session.oauth_url.as_deref(),
        Some("https://oauth.accounts.hytale.com/oauth2/device/verify?user_code=ABCD-1234")
    );
    assert_eq!(session.percent, Some(100.0));

    // Scratch files are cleaned up after a successful run.
    assert!(!f.dir.path().join("work").join("game").exists());
    Ok(())
}

#[tokio::test]
async fn test_install_into_copies_from_cache() -> Result<()> {
    let f = fixture(HAPPY_HELPER, 30_000);
    let server_dir = f.dir.path().join("servers").join("survival");

    f.downloader.install_into(&server_dir).await?;
    assert!(server_dir.join(SERVER_JAR).is_file());
    assert!(server_dir.join(ASSETS_ARCHIVE).is_file());

    // A second install is served from the cache without running the helper.
    std::fs::remove_file(f.dir.path().join("fake-downloader.sh"))?;
    let second = f.dir.path().join("servers").join("creative");
    f.downloader.install_into(&second).await?;
    assert!(second.join(SERVER_JAR).is_file());
    Ok(())
}

#[tokio::test]
async fn test_failed_helper_rolls_back_install() -> Result<()> {
    let f = fixture("echo \"Error: account not authorized\"\nexit 1", 30_000);
    let server_dir = f.dir.path().join("servers").join("survival");

    let result = f.downloader.install_into(&server_dir).await;
    match result {
        Err(Error::DownloadFailed(message)) => {
            assert!(message.contains("account not authorized"), "{}", message)
        }
        other => panic!("expected DownloadFailed, got {:?}", other),
    }

    assert!(!server_dir.exists());
    assert!(!f.downloader.is_cached());
    assert_eq!(f.downloader.state(), DownloadState::Failed);
    assert!(f.downloader.session().and_then(|s| s.error).is_some());
    assert!(matches!(
        f.events.recent(None).last(),
        Some(PanelEvent::HytaleFailed { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_archive_without_artifacts_fails_verification() -> Result<()> {
    let f = fixture(
        "echo 'Downloading'\ncp \"$GAME_ZIP\" \"$2\"\nexit 0",
        30_000,
    );
    // Replace the prebuilt archive with one that lacks the assets.
    let game_zip = f.dir.path().join("prebuilt.zip");
    let file = std::fs::File::create(&game_zip)?;
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file(SERVER_JAR, zip::write::SimpleFileOptions::default())
        .map_err(|e| Error::Other(e.to_string()))?;
    zip.write_all(b"jar")?;
    zip.finish().map_err(|e| Error::Other(e.to_string()))?;

    assert!(matches!(
        f.downloader.ensure_cache_ready().await,
        Err(Error::VerificationFailure(_))
    ));
    assert!(!f.downloader.is_cached());
    Ok(())
}

#[tokio::test]
async fn test_helper_timeout_kills_helper() -> Result<()> {
    let f = fixture("echo 'Waiting for authorization'\nexec sleep 30", 300);

    let started = std::time::Instant::now();
    assert!(matches!(
        f.downloader.ensure_cache_ready().await,
        Err(Error::Timeout(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(f.downloader.state(), DownloadState::Failed);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_request_and_cancel() -> Result<()> {
    let f = fixture("echo 'Waiting for authorization'\nexec sleep 30", 60_000);

    let downloader = f.downloader.clone();
    let first = tokio::spawn(async move { downloader.ensure_cache_ready().await });

    tokio::time::timeout(Duration::from_secs(10), async {
        while f.downloader.state() != DownloadState::OauthPending {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("helper never started");

    assert!(matches!(
        f.downloader.ensure_cache_ready().await,
        Err(Error::DownloadInProgress)
    ));

    assert!(f.downloader.cancel());
    let result = tokio::time::timeout(Duration::from_secs(10), first)
        .await
        .expect("cancelled download did not finish")
        .expect("download task panicked");
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert!(!f.downloader.cancel());
    Ok(())
}

#[tokio::test]
async fn test_dropped_request_releases_pipeline() -> Result<()> {
    let f = fixture(
        "echo $$ > helper.pid\necho 'Waiting for authorization'\nexec sleep 30",
        60_000,
    );
    let pid_file = f.dir.path().join("work").join("helper.pid");

    // The caller gives up while the helper is still waiting for the user.
    let abandoned =
        tokio::time::timeout(Duration::from_millis(500), f.downloader.ensure_cache_ready()).await;
    assert!(abandoned.is_err());

    assert!(!f.downloader.cancel());
    assert_eq!(f.downloader.state(), DownloadState::Failed);
    assert!(matches!(
        f.events.recent(None).last(),
        Some(PanelEvent::HytaleFailed { .. })
    ));

    let pid: i32 = std::fs::read_to_string(&pid_file)?
        .trim()
        .parse()
        .expect("helper wrote its pid");
    let pid = nix::unistd::Pid::from_raw(pid);
    tokio::time::timeout(Duration::from_secs(5), async {
        while nix::sys::signal::kill(pid, None).is_ok() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("abandoned helper was not killed");

    // A new request runs its own pipeline instead of being turned away.
    let downloader = f.downloader.clone();
    let second = tokio::spawn(async move { downloader.ensure_cache_ready().await });
    tokio::time::timeout(Duration::from_secs(10), async {
        while f.downloader.state() != DownloadState::OauthPending {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("second pipeline never started");

    assert!(f.downloader.cancel());
    let result = second.await.expect("download task panicked");
    assert!(matches!(result, Err(Error::Cancelled(_))));
    Ok(())
}
