use hytale_panel::backup::BackupSchedule;
use hytale_panel::config::BackupConfig;
use hytale_panel::error::{Error, Result};
use hytale_panel::server::files::{ASSETS_ARCHIVE, SERVER_JAR};
use hytale_panel::store::{MemoryRecordStore, RecordStore, ServerRecord};
use hytale_panel::{Panel, PanelConfig};
use std::sync::Arc;
use tempfile::TempDir;

fn panel() -> (TempDir, Arc<MemoryRecordStore>, Panel) {
    let dir = tempfile::tempdir().unwrap();
    let server_path = dir.path().join("survival");
    std::fs::create_dir_all(&server_path).unwrap();
    std::fs::write(server_path.join(SERVER_JAR), b"jar").unwrap();
    std::fs::write(server_path.join(ASSETS_ARCHIVE), b"assets").unwrap();

    let store = Arc::new(MemoryRecordStore::new());
    store
        .insert_server(ServerRecord::new("survival", "Survival", 5520, &server_path))
        .unwrap();

    let config = PanelConfig {
        backup: BackupConfig {
            backups_dir: dir.path().join("backups"),
            startup_delay_ms: 0,
        },
        ..PanelConfig::default()
    };
    let panel = Panel::new(config, store.clone()).unwrap();
    (dir, store, panel)
}

fn nightly() -> BackupSchedule {
    BackupSchedule {
        enabled: true,
        cron: "0 4 * * *".to_string(),
        retention_days: 7,
    }
}

#[tokio::test]
async fn test_delete_server_cancels_schedule() -> Result<()> {
    let (dir, store, panel) = panel();
    panel.backups().set_schedule("survival", nightly()).await?;

    panel.delete_server("survival").await?;

    assert!(panel.backups().scheduled_ids().is_empty());
    assert!(store.get_server("survival").await?.is_none());
    assert!(!dir.path().join("survival").exists());
    Ok(())
}

#[tokio::test]
async fn test_failed_delete_keeps_schedule() -> Result<()> {
    let (_dir, _store, panel) = panel();
    panel.backups().set_schedule("orphan", nightly()).await?;

    assert!(matches!(
        panel.delete_server("orphan").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(panel.backups().scheduled_ids(), vec!["orphan".to_string()]);

    panel.shutdown().await?;
    assert!(panel.backups().scheduled_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_install_server_skips_complete_directory() -> Result<()> {
    let (_dir, _store, panel) = panel();

    // Files are already in place, so no download is attempted.
    panel.install_server("survival").await?;
    assert!(panel.downloader().session().is_none());

    assert!(matches!(
        panel.install_server("missing").await,
        Err(Error::NotFound(_))
    ));
    Ok(())
}
