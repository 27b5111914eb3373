use super::{BackupRecord, RecordStore, ServerRecord, ServerStatus};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    servers: HashMap<String, ServerRecord>,
    configs: HashMap<String, Map<String, Value>>,
    backups: Vec<BackupRecord>,
}

/// In-memory [`RecordStore`].
///
/// Used by the daemon binary when no external store is wired in, and by
/// tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a server record.
    pub fn insert_server(&self, record: ServerRecord) -> Result<()> {
        let mut tables = self.write()?;
        tables.servers.insert(record.id.clone(), record);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| Error::Store("Failed to lock record tables".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| Error::Store("Failed to lock record tables".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_server(&self, id: &str) -> Result<Option<ServerRecord>> {
        Ok(self.read()?.servers.get(id).cloned())
    }

    async fn get_all_servers(&self) -> Result<Vec<ServerRecord>> {
        let mut servers: Vec<ServerRecord> = self.read()?.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(servers)
    }

    async fn update_status(&self, id: &str, status: ServerStatus) -> Result<()> {
        let mut tables = self.write()?;
        let record = tables
            .servers
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get_config(&self, id: &str) -> Result<Map<String, Value>> {
        Ok(self.read()?.configs.get(id).cloned().unwrap_or_default())
    }

    async fn save_config(&self, id: &str, key: &str, value: Value) -> Result<()> {
        let mut tables = self.write()?;
        tables
            .configs
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        let mut tables = self.write()?;
        tables.servers.remove(id);
        tables.configs.remove(id);
        Ok(())
    }

    async fn create_backup_record(&self, record: BackupRecord) -> Result<()> {
        self.write()?.backups.push(record);
        Ok(())
    }

    async fn list_backups(&self, server_id: &str) -> Result<Vec<BackupRecord>> {
        let mut backups: Vec<BackupRecord> = self
            .read()?
            .backups
            .iter()
            .filter(|b| b.server_id == server_id)
            .cloned()
            .collect();
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(backups)
    }

    async fn delete_backup_record(&self, backup_id: &str) -> Result<()> {
        self.write()?.backups.retain(|b| b.id != backup_id);
        Ok(())
    }
}
