//! Live console broadcast.
//!
//! The [`ConsoleHub`] keeps, per server, the last [`HISTORY_LIMIT`] output
//! chunks and a set of observers. A new observer gets the whole history as a
//! single message; after that every published chunk is delivered to it in
//! publish order.

mod dedup;

pub use dedup::OutputDeduper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Maximum number of chunks retained per server.
pub const HISTORY_LIMIT: usize = 1000;

/// Identifies one observer (typically one client connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One chunk of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// What an observer receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleMessage {
    /// Full history at subscribe time, newline-joined
    History { server_id: String, text: String },
    /// One new chunk
    Output { server_id: String, line: ConsoleLine },
}

/// Sending half handed to the hub on subscribe.
pub type ConsoleSender = mpsc::UnboundedSender<ConsoleMessage>;

#[derive(Default)]
struct ServerConsole {
    history: VecDeque<ConsoleLine>,
    subscribers: HashMap<ObserverId, ConsoleSender>,
}

/// Per-server output history and observer fan-out.
pub struct ConsoleHub {
    consoles: Mutex<HashMap<String, ServerConsole>>,
    capacity: usize,
}

impl ConsoleHub {
    /// Create a hub that keeps [`HISTORY_LIMIT`] chunks per server.
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LIMIT)
    }

    /// Create a hub that keeps `capacity` chunks per server. At least the
    /// latest chunk is always kept.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            consoles: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ServerConsole>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.consoles.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `sender` for `server_id` and immediately send it the history.
    #[tracing::instrument(skip(self, sender), fields(server_id = %server_id, observer = %observer))]
    pub fn subscribe(&self, server_id: &str, observer: ObserverId, sender: ConsoleSender) {
        let mut consoles = self.lock();
        let console = consoles.entry(server_id.to_string()).or_default();

        let text = console
            .history
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if sender
            .send(ConsoleMessage::History {
                server_id: server_id.to_string(),
                text,
            })
            .is_err()
        {
            tracing::debug!("Observer closed before history was delivered");
        }

        console.subscribers.insert(observer, sender);
        tracing::debug!(subscribers = console.subscribers.len(), "Observer subscribed");
    }

    /// Append a chunk to the history and deliver it to open observers.
    ///
    /// Returns how many observers the chunk was delivered to.
    pub fn publish(&self, server_id: &str, text: &str) -> usize {
        let line = ConsoleLine {
            text: text.to_string(),
            timestamp: Utc::now(),
        };

        let mut consoles = self.lock();
        let console = consoles.entry(server_id.to_string()).or_default();

        while console.history.len() >= self.capacity {
            console.history.pop_front();
        }
        console.history.push_back(line.clone());

        let mut delivered = 0;
        for sender in console.subscribers.values() {
            if sender.is_closed() {
                continue;
            }
            let message = ConsoleMessage::Output {
                server_id: server_id.to_string(),
                line: line.clone(),
            };
            if sender.send(message).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Remove one observer from one server.
    pub fn unsubscribe(&self, server_id: &str, observer: ObserverId) -> bool {
        self.lock()
            .get_mut(server_id)
            .is_some_and(|console| console.subscribers.remove(&observer).is_some())
    }

    /// Remove an observer from every server. Call this on disconnect.
    #[tracing::instrument(skip(self), fields(observer = %observer))]
    pub fn unsubscribe_all(&self, observer: ObserverId) -> usize {
        let mut removed = 0;
        for console in self.lock().values_mut() {
            if console.subscribers.remove(&observer).is_some() {
                removed += 1;
            }
        }
        tracing::debug!(removed, "Observer unsubscribed");
        removed
    }

    /// Snapshot of a server's history, oldest first.
    pub fn history(&self, server_id: &str) -> Vec<ConsoleLine> {
        self.lock()
            .get(server_id)
            .map(|console| console.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a server's history, keeping its observers.
    pub fn clear(&self, server_id: &str) {
        if let Some(console) = self.lock().get_mut(server_id) {
            console.history.clear();
        }
    }

    /// Forget a server entirely (history and observers).
    pub fn remove(&self, server_id: &str) {
        self.lock().remove(server_id);
    }

    pub fn subscriber_count(&self, server_id: &str) -> usize {
        self.lock()
            .get(server_id)
            .map_or(0, |console| console.subscribers.len())
    }
}

impl Default for ConsoleHub {
    fn default() -> Self {
        Self::new()
    }
}
