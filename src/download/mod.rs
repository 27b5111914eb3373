//! External download orchestration for the game server files.
//!
//! The server jar and asset archive are fetched by an external helper
//! executable that authenticates through an OAuth device flow. This module
//! drives the helper, surfaces the verification URL and code as events as
//! soon as they appear in its output, then unpacks the downloaded archive
//! and places the two artifacts in a shared cache directory that new
//! servers are populated from.
//!
//! # Examples
//!
//! ```no_run
//! use hytale_panel::config::DownloadConfig;
//! use hytale_panel::download::HytaleDownloader;
//! use hytale_panel::events::EventBus;
//!
//! # async fn run() -> hytale_panel::Result<()> {
//! let downloader = HytaleDownloader::new(DownloadConfig::default(), EventBus::default());
//! downloader.install_into("/srv/hytale/survival".as_ref()).await?;
//! # Ok(())
//! # }
//! ```

mod helper;
mod scan;
mod unzip;

pub use helper::{fetch_helper, is_platform_executable};
pub use scan::{HelperScanner, HelperSignal};
pub use unzip::{collect_artifacts, extract_archive, find_file};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, PanelEvent};
use crate::server::files::{self, ASSETS_ARCHIVE, SERVER_JAR};
use crate::server::{LaunchSpec, ProcessExit, ProcessHandle, ProcessSignal, ServerProcess};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Name of the archive the helper writes inside the work directory.
pub const GAME_ARCHIVE: &str = "game.zip";

/// Helper output lines retained per session.
const OUTPUT_LIMIT: usize = 200;

/// How long a killed helper gets to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    Idle,
    /// Helper executable available
    DownloaderFetched,
    /// Helper running, waiting for the user to authorize
    OauthPending,
    /// Helper running and transferring data
    Downloading,
    Extracting,
    Copying,
    Complete,
    Failed,
}

impl DownloadState {
    /// Whether a pipeline in this state is still in flight.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Complete | Self::Failed)
    }
}

/// Snapshot of the current or most recent pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSession {
    pub state: DownloadState,
    pub oauth_url: Option<String>,
    pub oauth_code: Option<String>,
    pub percent: Option<f32>,
    /// Recent helper output, oldest first
    pub output: VecDeque<String>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub error: Option<String>,
}

impl DownloadSession {
    fn new(timeout: Duration) -> Self {
        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| started_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            state: DownloadState::Idle,
            oauth_url: None,
            oauth_code: None,
            percent: None,
            output: VecDeque::new(),
            started_at,
            deadline,
            error: None,
        }
    }

    fn record_output(&mut self, line: String) {
        if self.output.len() >= OUTPUT_LIMIT {
            self.output.pop_front();
        }
        self.output.push_back(line);
    }
}

#[derive(Default)]
struct Slot {
    session: Option<DownloadSession>,
    scanner: HelperScanner,
    helper: Option<ProcessHandle>,
    running: bool,
    cancelled: bool,
}

/// Holds the single-flight slot while a pipeline runs.
///
/// Dropped without [`release`](Self::release) when the caller abandons the
/// future: the helper is killed and the session is marked failed so later
/// requests can start over.
struct PipelineClaim<'a> {
    downloader: &'a HytaleDownloader,
    finished: bool,
}

impl PipelineClaim<'_> {
    fn release(&mut self) {
        self.finished = true;
        let mut slot = self.downloader.slot();
        slot.running = false;
        slot.helper = None;
    }
}

impl Drop for PipelineClaim<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let abandoned = {
            let mut slot = self.downloader.slot();
            slot.running = false;
            if let Some(helper) = slot.helper.take() {
                helper.signal(ProcessSignal::Kill);
            }
            match slot.session.as_mut() {
                Some(session) if session.state.is_active() || session.state == DownloadState::Idle => {
                    session.state = DownloadState::Failed;
                    session.error = Some("download abandoned".to_string());
                    true
                }
                _ => false,
            }
        };

        tracing::warn!("Download pipeline dropped before completion, helper killed");
        if abandoned {
            self.downloader.inner.events.emit(PanelEvent::HytaleFailed {
                error: "download abandoned".to_string(),
            });
        }
    }
}

struct DownloaderInner {
    config: DownloadConfig,
    events: EventBus,
    slot: Mutex<Slot>,
}

/// Runs at most one download pipeline at a time for its cache directory.
#[derive(Clone)]
pub struct HytaleDownloader {
    inner: Arc<DownloaderInner>,
}

impl HytaleDownloader {
    pub fn new(config: DownloadConfig, events: EventBus) -> Self {
        Self {
            inner: Arc::new(DownloaderInner {
                config,
                events,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.inner.config.cache_dir
    }

    /// Whether both artifacts are already cached.
    pub fn is_cached(&self) -> bool {
        files::check_artifacts(self.cache_dir()).is_ok()
    }

    pub fn state(&self) -> DownloadState {
        self.slot()
            .session
            .as_ref()
            .map(|session| session.state)
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<DownloadSession> {
        self.slot().session.clone()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make sure the cache holds both artifacts, running the pipeline if not.
    ///
    /// Returns the cache directory. A call made while another pipeline is in
    /// flight fails with [`Error::DownloadInProgress`] unless the cache is
    /// already complete.
    #[tracing::instrument(skip(self), fields(cache = %self.cache_dir().display()))]
    pub async fn ensure_cache_ready(&self) -> Result<PathBuf> {
        if self.is_cached() {
            tracing::debug!("Server files already cached");
            return Ok(self.cache_dir().to_path_buf());
        }

        {
            let mut slot = self.slot();
            if slot.running {
                tracing::warn!("Download requested while another is in flight");
                return Err(Error::DownloadInProgress);
            }
            *slot = Slot {
                session: Some(DownloadSession::new(self.inner.config.helper_timeout())),
                running: true,
                ..Slot::default()
            };
        }

        tracing::info!("Starting server file download");
        let mut claim = PipelineClaim {
            downloader: self,
            finished: false,
        };
        let result = self.run_pipeline().await;
        claim.release();

        match result {
            Ok(()) => {
                self.set_state(DownloadState::Complete, None);
                self.inner.events.emit(PanelEvent::HytaleComplete {
                    cache_dir: self.cache_dir().to_path_buf(),
                });
                tracing::info!("Server files cached");
                Ok(self.cache_dir().to_path_buf())
            }
            Err(e) => {
                tracing::error!(error = %e, "Download pipeline failed");
                {
                    let mut slot = self.slot();
                    if let Some(session) = slot.session.as_mut() {
                        session.state = DownloadState::Failed;
                        session.error = Some(e.to_string());
                    }
                }
                self.inner.events.emit(PanelEvent::HytaleFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Kill the active helper. Whatever is already cached stays.
    #[tracing::instrument(skip(self))]
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot();
        if !slot.running {
            return false;
        }
        slot.cancelled = true;
        if let Some(helper) = slot.helper.as_ref() {
            helper.signal(ProcessSignal::Kill);
        }
        tracing::info!("Download cancelled");
        true
    }

    /// Populate `server_dir` with both artifacts from the cache, downloading
    /// them first if needed.
    ///
    /// When this call created `server_dir` and any step fails, the directory
    /// is removed again.
    #[tracing::instrument(skip(self), fields(server_dir = %server_dir.display()))]
    pub async fn install_into(&self, server_dir: &Path) -> Result<()> {
        let created = !server_dir.exists();

        let result = async {
            let cache = self.ensure_cache_ready().await?;
            tokio::fs::create_dir_all(server_dir).await?;
            for name in [SERVER_JAR, ASSETS_ARCHIVE] {
                tokio::fs::copy(cache.join(name), server_dir.join(name)).await?;
            }
            files::check_artifacts(server_dir)
                .map_err(|e| Error::VerificationFailure(e.to_string()))
        }
        .await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Install failed");
            if created {
                files::remove_server_dir(server_dir).await;
            }
        }
        result
    }

    async fn run_pipeline(&self) -> Result<()> {
        let config = &self.inner.config;
        tokio::fs::create_dir_all(&config.work_dir).await?;

        let helper = match &config.helper_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::MissingArtifact(path.clone()));
                }
                path.clone()
            }
            None => fetch_helper(&config.helper_url, &config.work_dir).await?,
        };
        self.check_cancelled()?;
        self.set_state(
            DownloadState::DownloaderFetched,
            Some(format!("Using helper {}", helper.display())),
        );

        let archive = config.work_dir.join(GAME_ARCHIVE);
        if archive.exists() {
            tokio::fs::remove_file(&archive).await?;
        }

        let exit = self.run_helper(&helper, &archive).await?;
        self.check_cancelled()?;
        if !exit.success {
            let tail = self
                .session()
                .map(|s| s.output.iter().rev().take(5).rev().cloned().collect::<Vec<_>>().join(" | "))
                .unwrap_or_default();
            return Err(Error::DownloadFailed(format!(
                "helper exited with {:?}: {}",
                exit.code, tail
            )));
        }
        if !archive.is_file() {
            return Err(Error::MissingArtifact(archive));
        }

        self.set_state(
            DownloadState::Extracting,
            Some("Extracting server files".to_string()),
        );
        let extracted = config.work_dir.join("game");
        if extracted.exists() {
            tokio::fs::remove_dir_all(&extracted).await?;
        }
        extract_archive(&archive, &extracted).await?;
        self.check_cancelled()?;

        self.set_state(
            DownloadState::Copying,
            Some("Copying server files to cache".to_string()),
        );
        collect_artifacts(&extracted, &config.cache_dir, &[SERVER_JAR, ASSETS_ARCHIVE]).await?;

        let _ = tokio::fs::remove_dir_all(&extracted).await;
        let _ = tokio::fs::remove_file(&archive).await;
        Ok(())
    }

    async fn run_helper(&self, helper: &Path, archive: &Path) -> Result<ProcessExit> {
        let spec = LaunchSpec {
            program: helper.display().to_string(),
            args: vec!["-download-path".to_string(), archive.display().to_string()],
            cwd: self.inner.config.work_dir.clone(),
        };
        tracing::debug!(program = %spec.program, "Spawning download helper");

        let mut process = ServerProcess::spawn(&spec)?;
        let handle = process.handle();
        let cancelled = {
            let mut slot = self.slot();
            if !slot.cancelled {
                slot.helper = Some(handle.clone());
            }
            slot.cancelled
        };
        if cancelled {
            process.abandon().await;
            return Err(Error::Cancelled("download cancelled".to_string()));
        }
        self.set_state(
            DownloadState::OauthPending,
            Some("Waiting for authorization".to_string()),
        );

        let downloader = self.clone();
        process.on_output(move |_stream, line| {
            let downloader = downloader.clone();
            async move { downloader.handle_helper_line(line) }
        });
        let handle = process.on_exit(|exit| async move {
            tracing::debug!(?exit, "Download helper exited");
        });

        let timeout = self.inner.config.helper_timeout();
        let exit = match tokio::time::timeout(timeout, handle.wait_exit()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::error!(?timeout, "Download helper timed out, killing");
                handle.signal(ProcessSignal::Kill);
                let _ = tokio::time::timeout(KILL_GRACE, handle.wait_exit()).await;
                self.slot().helper = None;
                return Err(Error::Timeout(format!(
                    "download helper did not finish within {:?}",
                    timeout
                )));
            }
        };
        self.slot().helper = None;

        exit.ok_or_else(|| Error::DownloadFailed("helper exit status unavailable".to_string()))
    }

    fn handle_helper_line(&self, line: String) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        tracing::debug!(target: "hytale_panel::download::helper", "{}", trimmed);

        let mut events = Vec::new();
        {
            let mut slot = self.slot();
            let signals = slot.scanner.scan(trimmed);
            let Some(session) = slot.session.as_mut() else {
                return;
            };
            session.record_output(trimmed.to_string());

            for signal in signals {
                match signal {
                    HelperSignal::OauthUrl(url) => {
                        tracing::info!(%url, "Helper requested authorization");
                        session.oauth_url = Some(url.clone());
                        events.push(PanelEvent::HytaleOauthUrl { url });
                    }
                    HelperSignal::OauthCode(code) => {
                        session.oauth_code = Some(code.clone());
                        events.push(PanelEvent::HytaleOauthCode { code });
                    }
                    HelperSignal::Downloading => {
                        session.state = DownloadState::Downloading;
                        events.push(PanelEvent::HytaleProgress {
                            state: DownloadState::Downloading,
                            percent: None,
                            message: Some(trimmed.to_string()),
                        });
                    }
                    HelperSignal::Progress(percent) => {
                        session.percent = Some(percent);
                        events.push(PanelEvent::HytaleProgress {
                            state: session.state,
                            percent: Some(percent),
                            message: None,
                        });
                    }
                }
            }
        }

        for event in events {
            self.inner.events.emit(event);
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.slot().cancelled {
            Err(Error::Cancelled("download cancelled".to_string()))
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: DownloadState, message: Option<String>) {
        if let Some(session) = self.slot().session.as_mut() {
            session.state = state;
        }
        tracing::debug!(?state, "Download state changed");
        self.inner.events.emit(PanelEvent::HytaleProgress {
            state,
            percent: None,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_states_are_active() {
        assert!(!DownloadState::Idle.is_active());
        assert!(DownloadState::OauthPending.is_active());
        assert!(DownloadState::Copying.is_active());
        assert!(!DownloadState::Complete.is_active());
        assert!(!DownloadState::Failed.is_active());
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(DownloadState::OauthPending).unwrap(),
            "oauth_pending"
        );
    }

    #[tokio::test]
    async fn cached_files_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SERVER_JAR), b"jar").unwrap();
        std::fs::write(dir.path().join(ASSETS_ARCHIVE), b"assets").unwrap();

        let downloader = HytaleDownloader::new(
            DownloadConfig {
                cache_dir: dir.path().to_path_buf(),
                helper_path: Some(dir.path().join("does-not-exist")),
                ..DownloadConfig::default()
            },
            EventBus::default(),
        );

        assert_eq!(downloader.ensure_cache_ready().await.unwrap(), dir.path());
        assert!(downloader.session().is_none());
        assert!(!downloader.cancel());
    }
}
