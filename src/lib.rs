/*!
 # Hytale Panel

 A Rust library for supervising Hytale dedicated servers.

 ## Overview

 Hytale Panel provides functionality to:
 - Start, stop and restart server processes with an escalating shutdown
 - Parse server output for readiness, authentication prompts and players
 - Fan console output out to any number of live observers
 - Download the server files through the official helper's OAuth device flow
 - Back servers up on a cron schedule with retention pruning

 Every state change is published on an [`events::EventBus`] so an outer
 transport (web socket, SSE, ...) can forward it to remote clients.

 ## Basic Usage

 ```no_run
 use hytale_panel::{Panel, Result};
 use hytale_panel::console::ObserverId;
 use hytale_panel::store::{MemoryRecordStore, ServerRecord};
 use std::sync::Arc;

 #[tokio::main]
 async fn main() -> Result<()> {
     let store = Arc::new(MemoryRecordStore::new());
     store.insert_server(ServerRecord::new("survival", "Survival", 5520, "/srv/hytale/survival"))?;

     let panel = Panel::from_config_file("panel.json", store)?;
     panel.start();

     // Make sure the server directory has its files, then launch it
     panel.install_server("survival").await?;
     panel.supervisor().start("survival").await?;

     // Watch the console
     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
     panel.console().subscribe("survival", ObserverId::new(), tx);
     while let Some(message) = rx.recv().await {
         println!("{:?}", message);
     }

     panel.shutdown().await
 }
 ```

 ## Features

 - **Process Supervision**: One instance per server, graceful stop with terminate/kill escalation
 - **Output Parsing**: Table-driven recognition of server log lines
 - **Console Broadcast**: Bounded history replay and duplicate suppression
 - **Downloads**: Helper-driven OAuth download with a shared artifact cache
 - **Backups**: Cron schedules, tar.gz archives and retention pruning
 - **Async Support**: Full async/await support on tokio

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod backup;
pub mod config;
pub mod console;
pub mod download;
pub mod error;
pub mod events;
pub mod parser;
pub mod server;
pub mod store;

pub use config::PanelConfig;
pub use error::{Error, Result};
pub use events::{EventBus, PanelEvent};
pub use server::ServerSupervisor;
pub use store::{RecordStore, ServerStatus};

use backup::BackupScheduler;
use console::ConsoleHub;
use download::HytaleDownloader;
use std::path::Path;
use std::sync::Arc;

/// Wires the supervisor, console hub, downloader and backup scheduler
/// around one record store and one event bus.
///
/// All public methods are instrumented with `tracing` spans.
pub struct Panel {
    config: PanelConfig,
    store: Arc<dyn RecordStore>,
    console: Arc<ConsoleHub>,
    events: EventBus,
    supervisor: ServerSupervisor,
    downloader: HytaleDownloader,
    backups: BackupScheduler,
}

impl Panel {
    /// Create a panel from a configuration file path
    #[tracing::instrument(skip(path, store), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>, store: Arc<dyn RecordStore>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = PanelConfig::from_file(path)?;
        Self::new(config, store)
    }

    /// Create a panel from a configuration string
    #[tracing::instrument(skip(config, store))]
    pub fn from_config_str(config: &str, store: Arc<dyn RecordStore>) -> Result<Self> {
        tracing::info!("Loading configuration from string");
        let config = PanelConfig::parse_from_str(config)?;
        Self::new(config, store)
    }

    /// Create a panel from a validated configuration
    #[tracing::instrument(skip(config, store))]
    pub fn new(config: PanelConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config::validate_config(&config)?;
        tracing::info!("Creating new Panel");

        let console = Arc::new(ConsoleHub::new());
        let events = EventBus::default();
        let supervisor = ServerSupervisor::new(
            Arc::clone(&store),
            Arc::clone(&console),
            events.clone(),
            config.runtime.clone(),
            config.supervisor.clone(),
        );
        let downloader = HytaleDownloader::new(config.download.clone(), events.clone());
        let backups = BackupScheduler::new(Arc::clone(&store), events.clone(), config.backup.clone());

        Ok(Self {
            config,
            store,
            console,
            events,
            supervisor,
            downloader,
            backups,
        })
    }

    /// Start background work: persisted backup schedules are loaded after
    /// the configured startup delay.
    pub fn start(&self) {
        self.backups.start();
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn console(&self) -> &Arc<ConsoleHub> {
        &self.console
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    pub fn downloader(&self) -> &HytaleDownloader {
        &self.downloader
    }

    pub fn backups(&self) -> &BackupScheduler {
        &self.backups
    }

    /// Copy the cached server files into a server's directory, downloading
    /// them first if the cache is empty.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn install_server(&self, id: &str) -> Result<()> {
        let record = self
            .store
            .get_server(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if server::files::check_artifacts(&record.server_path).is_ok() {
            tracing::debug!("Server files already installed");
            return Ok(());
        }
        self.downloader.install_into(&record.server_path).await
    }

    /// Delete a server and drop its backup schedule. A failed delete keeps
    /// the schedule.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete_server(&self, id: &str) -> Result<()> {
        self.supervisor.delete(id).await?;
        self.backups.cancel_schedule(id);
        Ok(())
    }

    /// Stop every server, cancel schedules and any running download.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down panel");
        self.backups.stop_all();
        self.downloader.cancel();
        self.supervisor.stop_all().await
    }
}
