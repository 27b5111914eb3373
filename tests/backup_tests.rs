use async_trait::async_trait;
use chrono::{Duration, Utc};
use hytale_panel::backup::{BackupSchedule, BackupScheduler, SCHEDULE_KEY};
use hytale_panel::config::BackupConfig;
use hytale_panel::error::{Error, Result};
use hytale_panel::events::{EventBus, PanelEvent};
use hytale_panel::store::{
    BackupRecord, MemoryRecordStore, RecordStore, ServerRecord, ServerStatus,
};
use mockall::mock;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

mock! {
    pub StoreMock {}

    #[async_trait]
    impl RecordStore for StoreMock {
        async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>>;
        async fn get_all_servers(&self) -> Result<Vec<ServerRecord>>;
        async fn update_status(&self, id: &str, status: ServerStatus) -> Result<()>;
        async fn get_config(&self, id: &str) -> Result<Map<String, Value>>;
        async fn save_config(&self, id: &str, key: &str, value: Value) -> Result<()>;
        async fn delete_server(&self, id: &str) -> Result<()>;
        async fn create_backup_record(&self, record: BackupRecord) -> Result<()>;
        async fn list_backups(&self, server_id: &str) -> Result<Vec<BackupRecord>>;
        async fn delete_backup_record(&self, backup_id: &str) -> Result<()>;
    }
}

struct Fixture {
    dir: TempDir,
    store: Arc<MemoryRecordStore>,
    events: EventBus,
    scheduler: BackupScheduler,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let server_path = dir.path().join("servers").join("survival");
    std::fs::create_dir_all(server_path.join("universe")).unwrap();
    std::fs::write(server_path.join("universe").join("world.dat"), b"chunks").unwrap();

    let store = Arc::new(MemoryRecordStore::new());
    store
        .insert_server(ServerRecord::new("survival", "Survival", 5520, &server_path))
        .unwrap();

    let events = EventBus::default();
    let scheduler = BackupScheduler::new(
        store.clone(),
        events.clone(),
        BackupConfig {
            backups_dir: dir.path().join("backups"),
            startup_delay_ms: 0,
        },
    );

    Fixture {
        dir,
        store,
        events,
        scheduler,
    }
}

/// Store a backup record `age_days` old with an archive file behind it.
async fn seed_backup(store: &MemoryRecordStore, dir: &Path, age_days: i64) -> BackupRecord {
    let path = dir.join(format!("aged-{}.tar.gz", age_days));
    std::fs::write(&path, b"old archive").unwrap();

    let record = BackupRecord {
        id: format!("backup-{}", age_days),
        server_id: "survival".to_string(),
        name: format!("aged-{}.tar.gz", age_days),
        path,
        size_bytes: 11,
        created_at: Utc::now() - Duration::days(age_days),
    };
    store.create_backup_record(record.clone()).await.unwrap();
    record
}

fn daily(retention_days: u32) -> BackupSchedule {
    BackupSchedule {
        enabled: true,
        cron: "0 4 * * *".to_string(),
        retention_days,
    }
}

#[tokio::test]
async fn test_run_backup_creates_archive_and_record() -> Result<()> {
    let f = fixture();
    let mut events = f.events.subscribe();

    let record = f
        .scheduler
        .run_backup("survival", 0)
        .await?
        .expect("server exists");

    assert_eq!(record.server_id, "survival");
    assert!(record.name.starts_with("Survival-"));
    assert!(record.name.ends_with(".tar.gz"));
    assert!(record.path.starts_with(f.dir.path().join("backups").join("survival")));
    assert!(record.path.is_file());
    assert!(record.size_bytes > 0);

    assert_eq!(f.store.list_backups("survival").await?, vec![record.clone()]);
    assert_eq!(
        events.recv().await.unwrap(),
        PanelEvent::BackupCreated { backup: record }
    );
    Ok(())
}

#[tokio::test]
async fn test_retention_prunes_only_expired_backups() -> Result<()> {
    let f = fixture();
    let aged = f.dir.path().join("aged");
    std::fs::create_dir_all(&aged)?;

    let mut seeded = Vec::new();
    for age in [1, 5, 10, 20] {
        seeded.push(seed_backup(&f.store, &aged, age).await);
    }

    let fresh = f
        .scheduler
        .run_backup("survival", 7)
        .await?
        .expect("server exists");

    let remaining: Vec<String> = f
        .store
        .list_backups("survival")
        .await?
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(
        remaining,
        vec!["backup-5".to_string(), "backup-1".to_string(), fresh.id]
    );

    assert!(seeded[0].path.exists());
    assert!(seeded[1].path.exists());
    assert!(!seeded[2].path.exists());
    assert!(!seeded[3].path.exists());
    Ok(())
}

#[tokio::test]
async fn test_prune_tolerates_missing_archive_files() -> Result<()> {
    let f = fixture();
    let record = BackupRecord {
        id: "gone".to_string(),
        server_id: "survival".to_string(),
        name: "gone.tar.gz".to_string(),
        path: f.dir.path().join("never-written.tar.gz"),
        size_bytes: 0,
        created_at: Utc::now() - Duration::days(30),
    };
    f.store.create_backup_record(record).await?;

    assert_eq!(f.scheduler.prune_expired("survival", 7, Utc::now()).await?, 1);
    assert!(f.store.list_backups("survival").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_backup_of_deleted_server_is_skipped() -> Result<()> {
    let mut store = MockStoreMock::new();
    store.expect_get_server().times(1).returning(|_| Ok(None));
    store.expect_create_backup_record().never();
    store.expect_list_backups().never();

    let scheduler = BackupScheduler::new(
        Arc::new(store),
        EventBus::default(),
        BackupConfig::default(),
    );

    assert!(scheduler.run_backup("ghost", 7).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_set_schedule_registers_and_persists() -> Result<()> {
    let f = fixture();

    f.scheduler.set_schedule("survival", daily(7)).await?;
    assert_eq!(f.scheduler.scheduled_ids(), vec!["survival".to_string()]);

    let config = f.store.get_config("survival").await?;
    assert_eq!(
        BackupSchedule::from_config(&config)?,
        Some(daily(7))
    );

    // Replacing with a disabled schedule cancels the timer.
    let disabled = BackupSchedule {
        enabled: false,
        ..daily(7)
    };
    f.scheduler.set_schedule("survival", disabled).await?;
    assert!(f.scheduler.scheduled_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_cron_is_rejected() -> Result<()> {
    let f = fixture();
    let schedule = BackupSchedule {
        enabled: true,
        cron: "every day at noon".to_string(),
        retention_days: 0,
    };

    assert!(matches!(
        f.scheduler.set_schedule("survival", schedule).await,
        Err(Error::Schedule(_))
    ));
    assert!(f.scheduler.scheduled_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_load_schedules_from_store() -> Result<()> {
    let f = fixture();
    let other = f.dir.path().join("servers").join("creative");
    std::fs::create_dir_all(&other)?;
    f.store
        .insert_server(ServerRecord::new("creative", "Creative", 5521, &other))?;

    f.store
        .save_config("survival", SCHEDULE_KEY, serde_json::to_value(daily(3))?)
        .await?;
    f.store
        .save_config(
            "creative",
            SCHEDULE_KEY,
            serde_json::json!({"enabled": true, "cron": "not a cron"}),
        )
        .await?;

    assert_eq!(f.scheduler.load_schedules().await?, 1);
    assert_eq!(f.scheduler.scheduled_ids(), vec!["survival".to_string()]);

    assert!(f.scheduler.cancel_schedule("survival"));
    assert!(!f.scheduler.cancel_schedule("survival"));
    Ok(())
}

#[tokio::test]
async fn test_start_loads_after_delay_and_stop_all_clears() -> Result<()> {
    let f = fixture();
    f.store
        .save_config("survival", SCHEDULE_KEY, serde_json::to_value(daily(0))?)
        .await?;

    f.scheduler.start();
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while f.scheduler.scheduled_ids().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("schedules were never loaded");

    f.scheduler.stop_all();
    assert!(f.scheduler.scheduled_ids().is_empty());
    Ok(())
}
