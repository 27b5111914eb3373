use hytale_panel::config::{
    LeaveMatch, PanelConfig, SupervisorConfig, validate_config,
    validator::validate_supervisor_config,
};
use hytale_panel::error::{Error, Result};
use std::io::Write;
use std::path::PathBuf;

#[test]
fn test_parse_config() -> Result<()> {
    let config_str = r#"{
        "runtime": {
            "javaPath": "/usr/lib/jvm/java-25/bin/java",
            "jvmArgs": ["-Xms2G", "-Xmx8G"],
            "stopCommand": "stop"
        },
        "supervisor": {
            "gracefulTimeoutMs": 30000,
            "leaveMatch": "exact"
        },
        "download": {
            "cacheDir": "/var/lib/hytale/cache",
            "helperPath": "/opt/hytale-downloader"
        },
        "backup": {
            "backupsDir": "/var/lib/hytale/backups",
            "startupDelayMs": 0
        }
    }"#;

    let config = PanelConfig::parse_from_str(config_str)?;

    assert_eq!(config.runtime.java_path, "/usr/lib/jvm/java-25/bin/java");
    assert_eq!(config.runtime.jvm_args, vec!["-Xms2G", "-Xmx8G"]);
    assert_eq!(config.runtime.auth_command, "/auth login device");

    assert_eq!(config.supervisor.graceful_timeout_ms, 30_000);
    assert_eq!(config.supervisor.terminate_timeout_ms, 5_000);
    assert_eq!(config.supervisor.leave_match, LeaveMatch::Exact);

    assert_eq!(config.download.cache_dir, PathBuf::from("/var/lib/hytale/cache"));
    assert_eq!(
        config.download.helper_path,
        Some(PathBuf::from("/opt/hytale-downloader"))
    );
    assert_eq!(config.download.helper_timeout_ms, 600_000);

    assert_eq!(config.backup.backups_dir, PathBuf::from("/var/lib/hytale/backups"));
    assert_eq!(config.backup.startup_delay_ms, 0);

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_empty_config_uses_defaults() -> Result<()> {
    let config = PanelConfig::parse_from_str("{}")?;

    assert_eq!(config.runtime.java_path, "java");
    assert_eq!(config.supervisor.dedup_window_ms, 500);
    assert_eq!(config.supervisor.leave_match, LeaveMatch::Substring);
    assert!(config.download.helper_path.is_none());

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_validate_config() {
    let mut config = PanelConfig::default();
    config.runtime.java_path = "  ".to_string();
    assert!(matches!(
        validate_config(&config),
        Err(Error::ConfigInvalid(_))
    ));

    let config = PanelConfig {
        download: hytale_panel::config::DownloadConfig {
            helper_timeout_ms: 0,
            ..Default::default()
        },
        ..PanelConfig::default()
    };
    assert!(matches!(
        validate_config(&config),
        Err(Error::ConfigInvalid(_))
    ));
}

#[test]
fn test_validate_supervisor_timings() {
    let zero_interval = SupervisorConfig {
        stats_interval_ms: 0,
        ..SupervisorConfig::default()
    };
    assert!(validate_supervisor_config(&zero_interval).is_err());

    let wide_dedup = SupervisorConfig {
        dedup_window_ms: 1_000,
        ..SupervisorConfig::default()
    };
    assert!(validate_supervisor_config(&wide_dedup).is_err());

    assert!(validate_supervisor_config(&SupervisorConfig::default()).is_ok());
}

#[test]
fn test_invalid_json() {
    let result = PanelConfig::parse_from_str(r#"{"runtime": {"javaPath": 42}}"#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_from_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(file, r#"{{"supervisor": {{"restartDelayMs": 250}}}}"#)?;

    let config = PanelConfig::from_file(file.path())?;
    assert_eq!(config.supervisor.restart_delay().as_millis(), 250);

    let missing = PanelConfig::from_file("/definitely/not/here/panel.json");
    assert!(matches!(missing, Err(Error::ConfigParse(_))));
    Ok(())
}
