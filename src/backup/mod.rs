//! Scheduled backups of server directories.
//!
//! Each server may carry a [`BackupSchedule`] in its persisted config. The
//! [`BackupScheduler`] keeps one timer task per enabled schedule; on every
//! firing it archives the server directory into
//! `<backups_dir>/<server_id>/`, records the archive in the record store and
//! prunes backups that have outlived the retention window.
//!
//! # Examples
//!
//! ```no_run
//! use hytale_panel::backup::{BackupSchedule, BackupScheduler};
//! use hytale_panel::config::BackupConfig;
//! use hytale_panel::events::EventBus;
//! use hytale_panel::store::MemoryRecordStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> hytale_panel::Result<()> {
//! let scheduler = BackupScheduler::new(
//!     Arc::new(MemoryRecordStore::new()),
//!     EventBus::default(),
//!     BackupConfig::default(),
//! );
//!
//! scheduler
//!     .set_schedule(
//!         "survival",
//!         BackupSchedule {
//!             enabled: true,
//!             cron: "0 4 * * *".to_string(),
//!             retention_days: 7,
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod archive;
mod schedule;

pub use archive::{archive_name, create_archive, remove_archive};
pub use schedule::{BackupSchedule, SCHEDULE_KEY, next_fire, parse_cron};

use crate::config::BackupConfig;
use crate::error::Result;
use crate::events::{EventBus, PanelEvent};
use crate::store::{BackupRecord, RecordStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct SchedulerInner {
    store: Arc<dyn RecordStore>,
    events: EventBus,
    config: BackupConfig,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    startup: Mutex<Option<JoinHandle<()>>>,
}

/// Cron-driven backup timers, one per server.
#[derive(Clone)]
pub struct BackupScheduler {
    inner: Arc<SchedulerInner>,
}

impl BackupScheduler {
    pub fn new(store: Arc<dyn RecordStore>, events: EventBus, config: BackupConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                events,
                config,
                timers: Mutex::new(HashMap::new()),
                startup: Mutex::new(None),
            }),
        }
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.inner.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load every persisted schedule once the startup delay has passed.
    pub fn start(&self) {
        let scheduler = self.clone();
        let delay = self.inner.config.startup_delay();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match scheduler.load_schedules().await {
                Ok(count) => tracing::info!(count, "Backup schedules loaded"),
                Err(e) => tracing::error!(error = %e, "Failed to load backup schedules"),
            }
        });

        let previous = self
            .inner
            .startup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Register a timer for every server with an active persisted schedule.
    /// Returns how many timers were registered.
    #[tracing::instrument(skip(self))]
    pub async fn load_schedules(&self) -> Result<usize> {
        let mut registered = 0;

        for server in self.inner.store.get_all_servers().await? {
            let config = match self.inner.store.get_config(&server.id).await {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(server_id = %server.id, error = %e, "Failed to read server config");
                    continue;
                }
            };

            match BackupSchedule::from_config(&config) {
                Ok(Some(schedule)) => match self.register(&server.id, &schedule) {
                    Ok(true) => registered += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(server_id = %server.id, error = %e, "Skipping invalid backup schedule")
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(server_id = %server.id, error = %e, "Unreadable backup schedule")
                }
            }
        }

        Ok(registered)
    }

    /// Replace a server's schedule: cancel the old timer, persist the new
    /// schedule and register a timer if it is enabled.
    #[tracing::instrument(skip(self, schedule), fields(server_id = %id))]
    pub async fn set_schedule(&self, id: &str, schedule: BackupSchedule) -> Result<()> {
        self.cancel_schedule(id);

        let value = serde_json::to_value(&schedule)?;
        self.inner.store.save_config(id, SCHEDULE_KEY, value).await?;

        self.register(id, &schedule).map(|_| ()).map_err(|e| {
            tracing::error!(error = %e, "Invalid backup schedule");
            e
        })
    }

    /// Start the timer task for `schedule`. `Ok(false)` when the schedule is
    /// disabled.
    fn register(&self, id: &str, schedule: &BackupSchedule) -> Result<bool> {
        if !schedule.is_active() {
            return Ok(false);
        }
        let cron = parse_cron(&schedule.cron)?;

        let scheduler = self.clone();
        let server_id = id.to_string();
        let retention_days = schedule.retention_days;

        let task = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = next_fire(&cron, now) else {
                    tracing::info!(server_id = %server_id, "Backup schedule has no further firings");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tracing::debug!(server_id = %server_id, %next, "Next backup scheduled");
                tokio::time::sleep(wait).await;

                if let Err(e) = scheduler.run_backup(&server_id, retention_days).await {
                    tracing::error!(server_id = %server_id, error = %e, "Scheduled backup failed");
                }
            }
        });

        if let Some(previous) = self.timers().insert(id.to_string(), task) {
            previous.abort();
        }
        tracing::info!(server_id = %id, cron = %schedule.cron, "Backup schedule registered");
        Ok(true)
    }

    /// Archive a server now.
    ///
    /// Returns `Ok(None)` with a warning when the server no longer exists.
    /// When `retention_days > 0`, expired backups are pruned afterwards.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn run_backup(&self, id: &str, retention_days: u32) -> Result<Option<BackupRecord>> {
        let Some(server) = self.inner.store.get_server(id).await? else {
            tracing::warn!("Server no longer exists, skipping backup");
            return Ok(None);
        };

        let now = Utc::now();
        let name = archive_name(&server.name, now);
        let path = self.inner.config.backups_dir.join(id).join(&name);

        tracing::info!(path = %path.display(), "Creating backup");
        let size_bytes = create_archive(&server.server_path, &path).await?;

        let record = BackupRecord {
            id: Uuid::new_v4().to_string(),
            server_id: id.to_string(),
            name,
            path,
            size_bytes,
            created_at: now,
        };
        self.inner.store.create_backup_record(record.clone()).await?;
        self.inner.events.emit(PanelEvent::BackupCreated {
            backup: record.clone(),
        });
        tracing::info!(size_bytes, "Backup created");

        if retention_days > 0 {
            if let Err(e) = self.prune_expired(id, retention_days, now).await {
                tracing::warn!(error = %e, "Failed to prune expired backups");
            }
        }

        Ok(Some(record))
    }

    /// Delete every backup of `id` created before `now - retention_days`.
    /// File removal is best-effort. Returns how many records were deleted.
    #[tracing::instrument(skip(self, now), fields(server_id = %id))]
    pub async fn prune_expired(
        &self,
        id: &str,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff = now - chrono::Duration::days(i64::from(retention_days));
        let mut deleted = 0;

        for backup in self.inner.store.list_backups(id).await? {
            if backup.created_at >= cutoff {
                continue;
            }

            remove_archive(&backup.path).await;
            match self.inner.store.delete_backup_record(&backup.id).await {
                Ok(()) => {
                    tracing::info!(backup = %backup.name, "Pruned expired backup");
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(backup = %backup.name, error = %e, "Failed to delete backup record")
                }
            }
        }

        Ok(deleted)
    }

    /// Cancel a server's timer. Returns whether one existed.
    pub fn cancel_schedule(&self, id: &str) -> bool {
        match self.timers().remove(id) {
            Some(task) => {
                task.abort();
                tracing::debug!(server_id = %id, "Backup schedule cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer and a pending startup load.
    pub fn stop_all(&self) {
        if let Some(startup) = self
            .inner
            .startup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            startup.abort();
        }

        let timers: Vec<_> = self.timers().drain().collect();
        for (_, task) in &timers {
            task.abort();
        }
        tracing::info!(count = timers.len(), "Backup schedules stopped");
    }

    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.timers().keys().cloned().collect();
        ids.sort();
        ids
    }
}
