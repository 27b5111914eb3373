//! Lifecycle event bus.
//!
//! Every state change the core makes is published as a [`PanelEvent`]. The
//! real-time transport layer (out of scope for this crate) subscribes and
//! fans the events out to remote clients. A short ring of recent events is
//! kept so late subscribers and diagnostics can inspect what happened.

use crate::download::DownloadState;
use crate::parser::Player;
use crate::server::Stats;
use crate::store::{BackupRecord, ServerStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Number of events retained for [`EventBus::recent`].
const EVENT_HISTORY_LIMIT: usize = 1000;

/// Named events emitted by the core.
///
/// Serialized as `{"event": "<name>", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PanelEvent {
    ServerStatusChanged {
        server_id: String,
        status: ServerStatus,
    },
    ServerReady {
        server_id: String,
    },
    ServerStopped {
        server_id: String,
        exit_code: Option<i32>,
    },
    ServerPlayersChanged {
        server_id: String,
        players: Vec<Player>,
    },
    ServerStats {
        server_id: String,
        stats: Stats,
    },
    ServerAuthUrl {
        server_id: String,
        url: String,
    },
    ServerAuthCode {
        server_id: String,
        code: String,
    },
    ServerAuthSuccess {
        server_id: String,
    },
    ServerDeleted {
        server_id: String,
    },
    HytaleOauthUrl {
        url: String,
    },
    HytaleOauthCode {
        code: String,
    },
    HytaleProgress {
        state: DownloadState,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    HytaleComplete {
        cache_dir: PathBuf,
    },
    HytaleFailed {
        error: String,
    },
    BackupCreated {
        backup: BackupRecord,
    },
}

impl PanelEvent {
    /// The server this event concerns, if any.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::ServerStatusChanged { server_id, .. }
            | Self::ServerReady { server_id }
            | Self::ServerStopped { server_id, .. }
            | Self::ServerPlayersChanged { server_id, .. }
            | Self::ServerStats { server_id, .. }
            | Self::ServerAuthUrl { server_id, .. }
            | Self::ServerAuthCode { server_id, .. }
            | Self::ServerAuthSuccess { server_id }
            | Self::ServerDeleted { server_id } => Some(server_id),
            Self::BackupCreated { backup } => Some(&backup.server_id),
            _ => None,
        }
    }
}

/// Broadcasts [`PanelEvent`]s to every subscriber.
///
/// Cloning is cheap; clones share the channel and the history ring.
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel for live subscribers
    sender: broadcast::Sender<PanelEvent>,
    /// Recent events, oldest first
    history: Arc<Mutex<VecDeque<PanelEvent>>>,
}

impl EventBus {
    /// Create a bus whose subscribers may lag by up to `capacity` events
    /// before they start missing some.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(EVENT_HISTORY_LIMIT))),
        }
    }

    /// Publish an event. Never fails; an event with no subscribers is only
    /// recorded in the history.
    pub fn emit(&self, event: PanelEvent) {
        tracing::trace!(?event, "Emitting panel event");

        if let Ok(mut history) = self.history.lock() {
            if history.len() >= EVENT_HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let _ = self.sender.send(event);
    }

    /// Get a new receiver for live events.
    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, newest last, at most `limit` of them.
    pub fn recent(&self, limit: Option<usize>) -> Vec<PanelEvent> {
        let Ok(history) = self.history.lock() else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |limit| history.len().saturating_sub(limit));
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
