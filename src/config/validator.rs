use crate::config::{PanelConfig, RuntimeConfig, SupervisorConfig};
use crate::error::{Error, Result};

/// Validates the runtime launch settings
pub fn validate_runtime_config(config: &RuntimeConfig) -> Result<()> {
    if config.java_path.trim().is_empty() {
        return Err(Error::ConfigInvalid("runtime.javaPath is empty".to_string()));
    }

    if config.stop_command.trim().is_empty() {
        return Err(Error::ConfigInvalid(
            "runtime.stopCommand is empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates supervisor timings
pub fn validate_supervisor_config(config: &SupervisorConfig) -> Result<()> {
    let required = [
        ("gracefulTimeoutMs", config.graceful_timeout_ms),
        ("terminateTimeoutMs", config.terminate_timeout_ms),
        ("statsIntervalMs", config.stats_interval_ms),
    ];

    for (field, value) in required {
        if value == 0 {
            return Err(Error::ConfigInvalid(format!(
                "supervisor.{} must be greater than zero",
                field
            )));
        }
    }

    // Dedup is meant for writes duplicated across stdout/stderr, not for
    // legitimately repeated log lines.
    if config.dedup_window_ms >= 1_000 {
        return Err(Error::ConfigInvalid(
            "supervisor.dedupWindowMs must be below one second".to_string(),
        ));
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &PanelConfig) -> Result<()> {
    validate_runtime_config(&config.runtime)?;
    validate_supervisor_config(&config.supervisor)?;

    if config.download.helper_timeout_ms == 0 {
        return Err(Error::ConfigInvalid(
            "download.helperTimeoutMs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}
