use crate::config::{RuntimeConfig, SupervisorConfig};
use crate::console::{ConsoleHub, OutputDeduper};
use crate::error::{Error, Result};
use crate::events::{EventBus, PanelEvent};
use crate::parser::{OutputEvent, ParseContext, Player, parse_output, strip_ansi};
use crate::server::files;
use crate::server::monitor::{ResourceSample, Stats, spawn_stats_poll};
use crate::server::process::{
    LaunchSpec, OutputStream, ProcessExit, ProcessHandle, ProcessSignal, ServerProcess,
};
use crate::store::{RecordStore, ServerRecord, ServerStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Minimum spacing between two automatic auth-initiation commands.
const AUTH_REQUEST_COOLDOWN: Duration = Duration::from_secs(30);

/// How long a killed process gets to be reaped and its exit handled.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct AuthState {
    url_announced: bool,
    code_announced: bool,
    request_pending: bool,
    last_request: Option<Instant>,
}

/// A live server process and everything derived from its output.
struct ServerInstance {
    /// Distinguishes this run from a later one with the same server id
    run_id: Uuid,
    record: ServerRecord,
    process: ProcessHandle,
    started_at: Instant,
    status: ServerStatus,
    players: Vec<Player>,
    stats: Stats,
    poll: Option<JoinHandle<()>>,
    dedup: OutputDeduper,
    auth: AuthState,
}

/// Side effects decided under the instance lock and carried out after it
/// is released.
#[derive(Default)]
struct OutputActions {
    became_ready: Option<ServerRecord>,
    schedule_auth: bool,
    events: Vec<PanelEvent>,
}

struct SupervisorInner {
    store: Arc<dyn RecordStore>,
    console: Arc<ConsoleHub>,
    events: EventBus,
    runtime: RuntimeConfig,
    config: SupervisorConfig,
    instances: Mutex<HashMap<String, ServerInstance>>,
    /// Orders status checks with the store writes that follow them
    status_writes: tokio::sync::Mutex<()>,
}

/// Owns every running server process.
///
/// Drives the `stopped → starting → running → stopping → stopped` state
/// machine, feeds process output through the parser into the console hub,
/// polls resource usage and publishes lifecycle events. At most one
/// instance exists per server id. Cloning is cheap and clones share state.
///
/// All public methods are instrumented with `tracing` spans.
#[derive(Clone)]
pub struct ServerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl ServerSupervisor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        console: Arc<ConsoleHub>,
        events: EventBus,
        runtime: RuntimeConfig,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                store,
                console,
                events,
                runtime,
                config,
                instances: Mutex::new(HashMap::new()),
                status_writes: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, ServerInstance>> {
        // Critical sections never leave the map half-updated.
        self.inner
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Start a server process.
    ///
    /// Returns as soon as the process is spawned; the transition to
    /// `running` happens later, when the server prints its ready line.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn start(&self, id: &str) -> Result<()> {
        if self.is_running(id) {
            tracing::debug!("Server already running");
            return Err(Error::AlreadyRunning);
        }

        tracing::info!("Attempting to start server");
        let record = self
            .inner
            .store
            .get_server(id)
            .await?
            .ok_or_else(|| {
                tracing::error!("No record for server");
                Error::NotFound(id.to_string())
            })?;

        files::check_artifacts(&record.server_path).map_err(|e| {
            tracing::error!(error = %e, "Server files incomplete");
            e
        })?;

        let spec = LaunchSpec::for_server(&self.inner.runtime, &record);
        tracing::debug!(program = %spec.program, args = ?spec.args, "Spawning server process");

        let mut process = match ServerProcess::spawn(&spec) {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn server process");
                self.persist_status(id, ServerStatus::Stopped).await;
                return Err(e);
            }
        };

        let run_id = Uuid::new_v4();
        let handle = process.handle();
        let pid = handle.pid();

        let inserted = {
            let mut instances = self.instances();
            match instances.entry(id.to_string()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(ServerInstance {
                        run_id,
                        record,
                        process: handle,
                        started_at: Instant::now(),
                        status: ServerStatus::Starting,
                        players: Vec::new(),
                        stats: Stats::default(),
                        poll: None,
                        dedup: OutputDeduper::new(self.inner.config.dedup_window()),
                        auth: AuthState::default(),
                    });
                    true
                }
            }
        };

        if !inserted {
            tracing::warn!("Lost start race, discarding new process");
            process.abandon().await;
            return Err(Error::AlreadyRunning);
        }

        // Announced before output is wired so the ready line cannot be
        // overtaken.
        self.transition(id, run_id, ServerStatus::Starting).await;

        let output_supervisor = self.clone();
        let server_id = id.to_string();
        process.on_output(move |stream, line| {
            let supervisor = output_supervisor.clone();
            let server_id = server_id.clone();
            async move { supervisor.handle_output(&server_id, run_id, stream, line).await }
        });

        let exit_supervisor = self.clone();
        let server_id = id.to_string();
        process.on_exit(move |exit| async move {
            exit_supervisor.handle_exit(&server_id, run_id, exit).await
        });

        let poll_supervisor = self.clone();
        let server_id = id.to_string();
        let poll = spawn_stats_poll(pid, self.inner.config.stats_interval(), move |sample| {
            let supervisor = poll_supervisor.clone();
            let server_id = server_id.clone();
            async move { supervisor.handle_sample(&server_id, run_id, sample) }
        });

        let orphaned_poll = {
            let mut instances = self.instances();
            match instances.get_mut(id).filter(|i| i.run_id == run_id) {
                Some(instance) => {
                    instance.poll = Some(poll);
                    None
                }
                // Exited before the poll was registered.
                None => Some(poll),
            }
        };
        if let Some(poll) = orphaned_poll {
            poll.abort();
            return Ok(());
        }

        tracing::info!(pid, "Server process started");
        Ok(())
    }

    /// Stop a running server.
    ///
    /// Sends the graceful stop command, then escalates to a terminate
    /// signal and finally a kill if the process does not exit in time.
    /// Returns once the process has exited and its exit handling is done.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn stop(&self, id: &str) -> Result<()> {
        let (process, run_id) = {
            let mut instances = self.instances();
            let instance = instances.get_mut(id).ok_or_else(|| {
                tracing::warn!("Attempted to stop a server that is not running");
                Error::NotRunning
            })?;
            (instance.process.clone(), instance.run_id)
        };

        tracing::info!("Attempting to stop server");
        self.transition(id, run_id, ServerStatus::Stopping).await;

        if let Err(e) = process.write_line(&self.inner.runtime.stop_command).await {
            tracing::warn!(error = %e, "Could not send stop command, escalating");
        }

        let config = &self.inner.config;
        if tokio::time::timeout(config.graceful_timeout(), process.wait_exit())
            .await
            .is_err()
        {
            tracing::warn!("Server ignored stop command, sending terminate signal");
            process.signal(ProcessSignal::Terminate);

            if tokio::time::timeout(config.terminate_timeout(), process.wait_exit())
                .await
                .is_err()
            {
                tracing::warn!("Server ignored terminate signal, killing");
                process.signal(ProcessSignal::Kill);

                if tokio::time::timeout(KILL_GRACE, process.wait_exit())
                    .await
                    .is_err()
                {
                    tracing::error!("Server survived kill");
                    self.cancel_poll(id, run_id);
                    return Err(Error::Timeout(format!(
                        "server {} did not exit after kill",
                        id
                    )));
                }
            }
        }

        self.cancel_poll(id, run_id);
        tracing::info!("Server stopped successfully");
        Ok(())
    }

    /// Stop (if running), wait the settle delay, start again.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn restart(&self, id: &str) -> Result<()> {
        if self.is_running(id) {
            self.stop(id).await?;
        }
        tokio::time::sleep(self.inner.config.restart_delay()).await;
        self.start(id).await
    }

    /// Write a console command to the server's stdin.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn send_command(&self, id: &str, command: &str) -> Result<()> {
        let process = self
            .instances()
            .get(id)
            .map(|instance| instance.process.clone())
            .ok_or(Error::NotRunning)?;

        process.write_line(command).await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to send command");
            e
        })
    }

    /// Delete a server: stop it if needed, remove its directory and record.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let record = self
            .inner
            .store
            .get_server(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if self.is_running(id) {
            match self.stop(id).await {
                Ok(()) | Err(Error::NotRunning) => {}
                Err(e) => return Err(e),
            }
        }

        files::remove_server_dir(&record.server_path).await;
        self.inner.store.delete_server(id).await?;
        self.inner.console.remove(id);
        self.inner.events.emit(PanelEvent::ServerDeleted {
            server_id: id.to_string(),
        });

        tracing::info!("Server deleted");
        Ok(())
    }

    /// Stop every running server, reporting all failures together.
    #[tracing::instrument(skip(self))]
    pub async fn stop_all(&self) -> Result<()> {
        let mut errors = Vec::new();

        for id in self.running_ids() {
            match self.stop(&id).await {
                Ok(()) | Err(Error::NotRunning) => {}
                Err(e) => {
                    tracing::error!(server_id = %id, error = %e, "Failed to stop server");
                    errors.push((id, e));
                }
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0).1),
            _ => Err(Error::Other(format!(
                "Multiple servers failed to stop: {}",
                errors
                    .iter()
                    .map(|(id, e)| format!("{}: {}", id, e))
                    .collect::<Vec<_>>()
                    .join("; ")
            ))),
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.instances().contains_key(id)
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.instances().keys().cloned().collect()
    }

    /// Live status, `None` when no instance exists.
    pub fn status(&self, id: &str) -> Option<ServerStatus> {
        self.instances().get(id).map(|instance| instance.status)
    }

    pub fn players(&self, id: &str) -> Result<Vec<Player>> {
        self.instances()
            .get(id)
            .map(|instance| instance.players.clone())
            .ok_or(Error::NotRunning)
    }

    pub fn stats(&self, id: &str) -> Result<Stats> {
        self.instances()
            .get(id)
            .map(|instance| instance.stats)
            .ok_or(Error::NotRunning)
    }

    async fn handle_output(&self, id: &str, run_id: Uuid, stream: OutputStream, raw: String) {
        let text = strip_ansi(&raw);
        if text.trim().is_empty() {
            return;
        }

        let actions = {
            let mut instances = self.instances();
            let Some(instance) = instances.get_mut(id).filter(|i| i.run_id == run_id) else {
                drop(instances);
                // Trailing output after exit handling still reaches observers.
                self.inner.console.publish(id, &text);
                return;
            };

            if !instance.dedup.should_publish(&text) {
                tracing::trace!(server_id = %id, %stream, "Suppressed duplicate output");
                return;
            }

            let outcome = parse_output(
                &text,
                &ParseContext {
                    players: &instance.players,
                    now: Utc::now(),
                    leave_match: self.inner.config.leave_match,
                },
            );
            instance.players = outcome.players;
            apply_output_events(id, instance, &outcome.events)
        };

        self.inner.console.publish(id, &text);

        for event in actions.events {
            self.inner.events.emit(event);
        }

        if let Some(record) = actions.became_ready {
            if self.announce_ready(id, run_id).await {
                tracing::info!(server_id = %id, "Server is ready");
                self.inner.events.emit(PanelEvent::ServerReady {
                    server_id: id.to_string(),
                });
                if let Err(e) = files::sync_server_config(&record).await {
                    tracing::warn!(server_id = %id, error = %e, "Failed to sync server config");
                }
            } else {
                tracing::debug!(server_id = %id, "Server left running before readiness was recorded");
            }
        }

        if actions.schedule_auth {
            self.schedule_auth_request(id, run_id);
        }
    }

    fn schedule_auth_request(&self, id: &str, run_id: Uuid) {
        let supervisor = self.clone();
        let server_id = id.to_string();
        let delay = self.inner.config.auth_command_delay();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let process = {
                let mut instances = supervisor.instances();
                let Some(instance) = instances.get_mut(&server_id).filter(|i| i.run_id == run_id)
                else {
                    return;
                };
                instance.auth.request_pending = false;
                instance.auth.last_request = Some(Instant::now());
                instance.process.clone()
            };

            tracing::info!(server_id = %server_id, "Requesting device authentication");
            if let Err(e) = process.write_line(&supervisor.inner.runtime.auth_command).await {
                tracing::warn!(server_id = %server_id, error = %e, "Failed to send auth command");
            }
        });
    }

    fn handle_sample(&self, id: &str, run_id: Uuid, sample: ResourceSample) {
        let stats = {
            let mut instances = self.instances();
            let Some(instance) = instances.get_mut(id).filter(|i| i.run_id == run_id) else {
                return;
            };
            instance.stats = Stats {
                cpu: sample.cpu,
                memory_mb: sample.memory_mb(),
                uptime_secs: instance.started_at.elapsed().as_secs(),
                player_count: instance.players.len(),
            };
            instance.stats
        };

        self.inner.events.emit(PanelEvent::ServerStats {
            server_id: id.to_string(),
            stats,
        });
    }

    async fn handle_exit(&self, id: &str, run_id: Uuid, exit: ProcessExit) {
        let removed = {
            let mut instances = self.instances();
            match instances.get(id) {
                Some(instance) if instance.run_id == run_id => instances.remove(id),
                _ => None,
            }
        };

        let Some(mut instance) = removed else {
            tracing::debug!(server_id = %id, "Exit already handled");
            return;
        };

        if let Some(poll) = instance.poll.take() {
            poll.abort();
        }

        if exit.success {
            tracing::info!(server_id = %id, code = ?exit.code, "Server process exited");
        } else {
            tracing::warn!(server_id = %id, code = ?exit.code, "Server process exited abnormally");
        }

        {
            let _writes = self.inner.status_writes.lock().await;
            self.persist_status(id, ServerStatus::Stopped).await;
        }
        self.inner.events.emit(PanelEvent::ServerStopped {
            server_id: id.to_string(),
            exit_code: exit.code,
        });

        if !instance.players.is_empty() {
            self.inner.events.emit(PanelEvent::ServerPlayersChanged {
                server_id: id.to_string(),
                players: Vec::new(),
            });
        }
    }

    fn cancel_poll(&self, id: &str, run_id: Uuid) {
        if let Some(instance) = self.instances().get_mut(id).filter(|i| i.run_id == run_id) {
            if let Some(poll) = instance.poll.take() {
                poll.abort();
            }
        }
    }

    /// Set the live status of this run, then persist and announce it.
    async fn transition(&self, id: &str, run_id: Uuid, status: ServerStatus) {
        let _writes = self.inner.status_writes.lock().await;
        let applied = {
            let mut instances = self.instances();
            match instances.get_mut(id).filter(|i| i.run_id == run_id) {
                Some(instance) => {
                    instance.status = status;
                    true
                }
                None => false,
            }
        };

        if applied {
            self.persist_status(id, status).await;
        }
    }

    /// Persist `running` for this run unless it has moved on since the
    /// ready line was seen.
    async fn announce_ready(&self, id: &str, run_id: Uuid) -> bool {
        let _writes = self.inner.status_writes.lock().await;
        let still_running = self
            .instances()
            .get(id)
            .is_some_and(|i| i.run_id == run_id && i.status == ServerStatus::Running);

        if still_running {
            self.persist_status(id, ServerStatus::Running).await;
        }
        still_running
    }

    /// Persist a status and emit `server_status_changed`.
    async fn persist_status(&self, id: &str, status: ServerStatus) {
        if let Err(e) = self.inner.store.update_status(id, status).await {
            tracing::error!(server_id = %id, %status, error = %e, "Failed to persist status");
        }
        self.inner.events.emit(PanelEvent::ServerStatusChanged {
            server_id: id.to_string(),
            status,
        });
    }
}

fn apply_output_events(
    id: &str,
    instance: &mut ServerInstance,
    events: &[OutputEvent],
) -> OutputActions {
    let mut actions = OutputActions::default();
    let server_id = id.to_string();

    for event in events {
        match event {
            OutputEvent::Ready => {
                if instance.status == ServerStatus::Starting {
                    instance.status = ServerStatus::Running;
                    actions.became_ready = Some(instance.record.clone());
                }
            }
            OutputEvent::AuthRequired => {
                let cooling_down = instance
                    .auth
                    .last_request
                    .is_some_and(|at| at.elapsed() < AUTH_REQUEST_COOLDOWN);
                if !instance.auth.request_pending && !cooling_down {
                    instance.auth.request_pending = true;
                    actions.schedule_auth = true;
                }
            }
            OutputEvent::AuthUrl(url) => {
                if !instance.auth.url_announced {
                    instance.auth.url_announced = true;
                    actions.events.push(PanelEvent::ServerAuthUrl {
                        server_id: server_id.clone(),
                        url: url.clone(),
                    });
                }
            }
            OutputEvent::AuthCode(code) => {
                if !instance.auth.code_announced {
                    instance.auth.code_announced = true;
                    actions.events.push(PanelEvent::ServerAuthCode {
                        server_id: server_id.clone(),
                        code: code.clone(),
                    });
                }
            }
            OutputEvent::AuthSuccess => {
                // A later re-authentication gets announced again.
                instance.auth = AuthState::default();
                actions.events.push(PanelEvent::ServerAuthSuccess {
                    server_id: server_id.clone(),
                });
            }
            OutputEvent::PlayersChanged => {
                actions.events.push(PanelEvent::ServerPlayersChanged {
                    server_id: server_id.clone(),
                    players: instance.players.clone(),
                });
            }
            OutputEvent::PlayerJoined(name) => {
                tracing::info!(server_id = %id, player = %name, "Player joined");
            }
            OutputEvent::PlayerLeft(name) => {
                tracing::info!(server_id = %id, player = %name, "Player left");
            }
        }
    }

    actions
}
