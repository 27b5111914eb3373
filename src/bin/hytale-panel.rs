use anyhow::Context;
use hytale_panel::store::MemoryRecordStore;
use hytale_panel::{Panel, PanelConfig, PanelEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_CONFIG: &str = "panel.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = if config_path.exists() {
        info!(path = %config_path.display(), "Loading configuration");
        PanelConfig::from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        warn!(path = %config_path.display(), "Configuration file not found, using defaults");
        PanelConfig::default()
    };

    let panel = Panel::new(config, Arc::new(MemoryRecordStore::new()))
        .context("invalid configuration")?;
    panel.start();

    let mut events = panel.events().subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PanelEvent::ServerStats { .. }) => {}
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "hytale_panel::events", "{}", json),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Hytale panel running, press Ctrl+C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;

    info!("Shutting down");
    if let Err(e) = panel.shutdown().await {
        warn!(error = %e, "Shutdown finished with errors");
    }
    logger.abort();

    info!("Panel stopped");
    Ok(())
}
