//! Files a server directory is expected to contain.

use crate::error::{Error, Result};
use crate::store::ServerRecord;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const SERVER_JAR: &str = "HytaleServer.jar";
pub const ASSETS_ARCHIVE: &str = "Assets.zip";
pub const CONFIG_FILE: &str = "config.json";

pub fn server_jar(dir: &Path) -> PathBuf {
    dir.join(SERVER_JAR)
}

pub fn assets_archive(dir: &Path) -> PathBuf {
    dir.join(ASSETS_ARCHIVE)
}

/// Fail with [`Error::MissingArtifact`] unless both the server jar and the
/// assets archive are present.
pub fn check_artifacts(dir: &Path) -> Result<()> {
    for path in [server_jar(dir), assets_archive(dir)] {
        if !path.is_file() {
            return Err(Error::MissingArtifact(path));
        }
    }
    Ok(())
}

/// Write the record's display name and limits into the server's own
/// `config.json`, keeping every other key.
pub async fn sync_server_config(record: &ServerRecord) -> Result<()> {
    let path = record.server_path.join(CONFIG_FILE);

    let mut config = match tokio::fs::read_to_string(&path).await {
        Ok(content) if !content.trim().is_empty() => {
            match serde_json::from_str::<Value>(&content)? {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        }
        Ok(_) => Map::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e.into()),
    };

    config.insert("ServerName".to_string(), Value::from(record.name.clone()));
    config.insert("MaxPlayers".to_string(), Value::from(record.max_players));
    config.insert("MaxViewRadius".to_string(), Value::from(record.max_view_radius));

    let content = serde_json::to_string_pretty(&Value::Object(config))?;
    tokio::fs::write(&path, content).await?;
    Ok(())
}

/// Remove a server's directory, logging instead of failing.
pub async fn remove_server_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::info!(path = %dir.display(), "Removed server directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %dir.display(), error = %e, "Failed to remove server directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_assets_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_JAR), b"jar").unwrap();

        match check_artifacts(dir.path()) {
            Err(Error::MissingArtifact(path)) => assert!(path.ends_with(ASSETS_ARCHIVE)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn config_sync_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"ServerName": "old", "MOTD": "hello"}"#,
        )
        .unwrap();

        let record = ServerRecord::new("s1", "Orbis", 5520, dir.path());
        sync_server_config(&record).await.unwrap();

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(written["ServerName"], "Orbis");
        assert_eq!(written["MOTD"], "hello");
        assert_eq!(written["MaxPlayers"], 100);
    }
}
