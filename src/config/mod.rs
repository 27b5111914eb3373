//! Configuration module for Hytale Panel.
//!
//! This module handles parsing, validation, and access to configuration
//! settings. Configuration is JSON with camelCase keys; every field has a
//! default, so an empty object is a valid configuration.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use hytale_panel::config::{PanelConfig, validate_config};
//!
//! let config = PanelConfig::from_file("panel.json").unwrap();
//! validate_config(&config).unwrap();
//! println!("Caching server files in {}", config.download.cache_dir.display());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use hytale_panel::config::{PanelConfig, SupervisorConfig};
//!
//! let config = PanelConfig {
//!     supervisor: SupervisorConfig {
//!         graceful_timeout_ms: 30_000,
//!         ..SupervisorConfig::default()
//!     },
//!     ..PanelConfig::default()
//! };
//! assert_eq!(config.supervisor.graceful_timeout().as_secs(), 30);
//! ```
mod parser;
pub mod validator;

pub use parser::{
    BackupConfig, DownloadConfig, LeaveMatch, PanelConfig, RuntimeConfig, SupervisorConfig,
};
pub use validator::validate_config;
