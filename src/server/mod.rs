/// Server management module for Hytale Panel.
///
/// This module handles the lifecycle, monitoring, and process management of
/// game server instances. It starts the Java process, watches its output for
/// readiness, authentication and player activity, polls its resource usage and
/// stops it with an escalating sequence of stop command, terminate signal and
/// kill. All public components are instrumented with `tracing` spans.
///
/// # Components
///
/// * `files` - Artifacts a server directory must contain and its `config.json`
/// * `monitor` - Periodic CPU, memory and uptime sampling
/// * `process` - Spawning, stdin writes, output pumps and exit handling
/// * `supervisor` - The per-server state machine tying it all together
///
/// # Examples
///
/// ```no_run
/// use hytale_panel::config::{RuntimeConfig, SupervisorConfig};
/// use hytale_panel::console::ConsoleHub;
/// use hytale_panel::events::EventBus;
/// use hytale_panel::server::ServerSupervisor;
/// use hytale_panel::store::{MemoryRecordStore, ServerRecord};
/// use std::sync::Arc;
///
/// # async fn run() -> hytale_panel::Result<()> {
/// let store = Arc::new(MemoryRecordStore::new());
/// store.insert_server(ServerRecord::new("survival", "Survival", 5520, "/srv/hytale/survival"))?;
///
/// let supervisor = ServerSupervisor::new(
///     store,
///     Arc::new(ConsoleHub::new()),
///     EventBus::default(),
///     RuntimeConfig::default(),
///     SupervisorConfig::default(),
/// );
///
/// supervisor.start("survival").await?;
/// supervisor.send_command("survival", "say hello").await?;
/// supervisor.stop("survival").await?;
/// # Ok(())
/// # }
/// ```
pub mod files;
pub mod monitor;
mod process;
mod supervisor;

pub use monitor::{ResourceSample, ResourceSampler, Stats};
pub use process::{
    LaunchSpec, OutputStream, ProcessExit, ProcessHandle, ProcessSignal, ServerProcess,
};
pub use supervisor::ServerSupervisor;
