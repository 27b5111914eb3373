use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status of a server, as persisted in its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// No process is running
    #[default]
    Stopped,
    /// Process spawned, waiting for the ready line
    Starting,
    /// Server reported it is ready
    Running,
    /// Stop requested, waiting for the process to exit
    Stopping,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// A configured game server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub port: u16,
    pub max_players: u32,
    pub max_view_radius: u32,
    /// Directory owned by this server; removed when the server is deleted.
    pub server_path: PathBuf,
    pub status: ServerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerRecord {
    /// Create a stopped record with default limits.
    pub fn new(id: impl Into<String>, name: impl Into<String>, port: u16, server_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            port,
            max_players: 100,
            max_view_radius: 32,
            server_path: server_path.into(),
            status: ServerStatus::Stopped,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A completed backup archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}
