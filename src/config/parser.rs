use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a "player left" line is matched against the current player list.
///
/// Log lines sometimes capture only part of a player name, so the default
/// treats a leave as matching when either name contains the other
/// (case-insensitively). `Exact` only removes a case-insensitive equal name,
/// which avoids removing "Al" when "Alice" leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaveMatch {
    /// Either name contains the other
    #[default]
    Substring,
    /// Case-insensitive equality
    Exact,
}

/// How the game server process is launched.
///
/// # Examples
///
/// ```
/// use hytale_panel::config::RuntimeConfig;
///
/// let runtime = RuntimeConfig {
///     java_path: "/usr/lib/jvm/java-25/bin/java".to_string(),
///     jvm_args: vec!["-Xmx8G".to_string()],
///     ..RuntimeConfig::default()
/// };
/// assert_eq!(runtime.stop_command, "stop");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Java executable, absolute or resolved through PATH.
    pub java_path: String,

    /// Arguments placed before `-jar`.
    pub jvm_args: Vec<String>,

    /// Line written to stdin to request a graceful shutdown.
    pub stop_command: String,

    /// Line written to stdin when the server asks for authentication.
    pub auth_command: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            java_path: "java".to_string(),
            jvm_args: vec!["-Xms1G".to_string(), "-Xmx4G".to_string()],
            stop_command: "stop".to_string(),
            auth_command: "/auth login device".to_string(),
        }
    }
}

/// Timings and matching policy for the process supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Wait after the stop command before sending a terminate signal.
    pub graceful_timeout_ms: u64,
    /// Wait after the terminate signal before killing the process.
    pub terminate_timeout_ms: u64,
    /// Settle delay between the stop and start halves of a restart.
    pub restart_delay_ms: u64,
    /// Resource-usage poll interval.
    pub stats_interval_ms: u64,
    /// Window in which identical output chunks are suppressed.
    pub dedup_window_ms: u64,
    /// Delay before answering an authentication prompt.
    pub auth_command_delay_ms: u64,
    /// Player-leave matching strictness.
    pub leave_match: LeaveMatch,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: 10_000,
            terminate_timeout_ms: 5_000,
            restart_delay_ms: 2_000,
            stats_interval_ms: 5_000,
            dedup_window_ms: 500,
            auth_command_delay_ms: 1_000,
            leave_match: LeaveMatch::Substring,
        }
    }
}

impl SupervisorConfig {
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_timeout_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn auth_command_delay(&self) -> Duration {
        Duration::from_millis(self.auth_command_delay_ms)
    }
}

/// Settings for the external asset download pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadConfig {
    /// Directory holding the cached `HytaleServer.jar` and `Assets.zip`.
    pub cache_dir: PathBuf,

    /// Scratch directory for the helper and the downloaded archive.
    pub work_dir: PathBuf,

    /// Where the helper archive is fetched from.
    pub helper_url: String,

    /// Use this helper executable instead of fetching one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper_path: Option<PathBuf>,

    /// Hard ceiling on the helper's run time.
    pub helper_timeout_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/cache"),
            work_dir: PathBuf::from("data/downloader"),
            helper_url: "https://downloader.hytale.com/hytale-downloader.zip".to_string(),
            helper_path: None,
            helper_timeout_ms: 10 * 60 * 1000,
        }
    }
}

impl DownloadConfig {
    pub fn helper_timeout(&self) -> Duration {
        Duration::from_millis(self.helper_timeout_ms)
    }
}

/// Settings for scheduled backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupConfig {
    /// Root directory; archives land in `<backupsDir>/<serverId>/`.
    pub backups_dir: PathBuf,

    /// Delay before persisted schedules are loaded at startup.
    pub startup_delay_ms: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backups_dir: PathBuf::from("data/backups"),
            startup_delay_ms: 5_000,
        }
    }
}

impl BackupConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

/// Main configuration for the panel.
///
/// # JSON Schema
///
/// Every section and field is optional:
///
/// ```json
/// {
///   "runtime": { "javaPath": "java", "jvmArgs": ["-Xmx4G"] },
///   "supervisor": { "gracefulTimeoutMs": 10000, "leaveMatch": "substring" },
///   "download": { "cacheDir": "data/cache", "helperTimeoutMs": 600000 },
///   "backup": { "backupsDir": "data/backups" }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use hytale_panel::config::PanelConfig;
///
/// let config = PanelConfig::parse_from_str(r#"{"runtime": {"javaPath": "java21"}}"#).unwrap();
/// assert_eq!(config.runtime.java_path, "java21");
/// assert_eq!(config.supervisor.graceful_timeout_ms, 10_000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PanelConfig {
    pub runtime: RuntimeConfig,
    pub supervisor: SupervisorConfig,
    pub download: DownloadConfig,
    pub backup: BackupConfig,
}

impl PanelConfig {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }
}
