//! Persistence boundary for server records, per-server config and backups.
//!
//! The supervisor, downloader and backup scheduler only ever talk to the
//! [`RecordStore`] trait. There are no transactional guarantees beyond
//! last-write-wins per key.

mod memory;
mod types;

pub use memory::MemoryRecordStore;
pub use types::{BackupRecord, ServerRecord, ServerStatus};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Operations the core performs against the record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one server record.
    async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>>;

    /// Fetch every server record.
    async fn get_all_servers(&self) -> Result<Vec<ServerRecord>>;

    /// Persist a new lifecycle status for a server.
    async fn update_status(&self, id: &str, status: ServerStatus) -> Result<()>;

    /// Fetch the opaque per-server config map.
    async fn get_config(&self, id: &str) -> Result<Map<String, Value>>;

    /// Store one key of the per-server config map.
    async fn save_config(&self, id: &str, key: &str, value: Value) -> Result<()>;

    /// Remove a server record and its config.
    async fn delete_server(&self, id: &str) -> Result<()>;

    /// Store a completed backup.
    async fn create_backup_record(&self, record: BackupRecord) -> Result<()>;

    /// List the backups of one server, oldest first.
    async fn list_backups(&self, server_id: &str) -> Result<Vec<BackupRecord>>;

    /// Remove a backup record. Does not touch the archive file.
    async fn delete_backup_record(&self, backup_id: &str) -> Result<()>;
}
