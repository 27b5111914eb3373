//! Console output parser.
//!
//! [`parse_output`] turns one chunk of server output into semantic events and
//! an updated player list. It is pure: the same chunk and the same context
//! always yield the same outcome, and nothing outside the return value is
//! touched. Deciding what to *do* with an event (announce an auth URL only
//! once, transition to `running` only from `starting`) is the supervisor's
//! job.
//!
//! Matching is best-effort against a format this crate does not control.
//! False negatives are acceptable; false positives on join/leave are limited
//! by de-duplicating joins and by the configurable leave matching.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use hytale_panel::config::LeaveMatch;
//! use hytale_panel::parser::{parse_output, OutputEvent, ParseContext};
//!
//! let ctx = ParseContext { players: &[], now: Utc::now(), leave_match: LeaveMatch::Substring };
//! let outcome = parse_output("[Server] Player 'Bob' joined", &ctx);
//! assert!(outcome.events.contains(&OutputEvent::PlayerJoined("Bob".to_string())));
//! assert_eq!(outcome.players[0].name, "Bob");
//! ```

mod patterns;

use crate::config::LeaveMatch;
use chrono::{DateTime, Utc};
use patterns::PlayerAction;
use serde::{Deserialize, Serialize};

/// A connected player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

/// Something the parser recognized in a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The server finished booting
    Ready,
    /// The server wants the operator to authenticate it
    AuthRequired,
    /// OAuth device verification URL
    AuthUrl(String),
    /// OAuth device code
    AuthCode(String),
    /// The server reported successful authentication
    AuthSuccess,
    /// A player was added to the list
    PlayerJoined(String),
    /// A player was removed from the list
    PlayerLeft(String),
    /// The player list differs from the input list
    PlayersChanged,
}

/// State the parser needs from the running instance.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    /// Players currently connected
    pub players: &'a [Player],
    /// Join time recorded for new players
    pub now: DateTime<Utc>,
    pub leave_match: LeaveMatch,
}

/// Result of parsing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub events: Vec<OutputEvent>,
    pub players: Vec<Player>,
}

/// Remove terminal control sequences and carriage returns.
pub fn strip_ansi(text: &str) -> String {
    patterns::ANSI_ESCAPE.replace_all(text, "").replace('\r', "")
}

/// Parse one chunk of (already ANSI-stripped) output.
pub fn parse_output(chunk: &str, ctx: &ParseContext<'_>) -> ParseOutcome {
    let mut events = Vec::new();

    if patterns::READY.is_match(chunk) {
        events.push(OutputEvent::Ready);
    }

    if patterns::AUTH_REQUIRED.is_match(chunk) {
        events.push(OutputEvent::AuthRequired);
    }

    let auth_url = patterns::AUTH_URL.find(chunk).map(|m| m.as_str().to_string());
    if let Some(url) = &auth_url {
        events.push(OutputEvent::AuthUrl(url.clone()));
    }

    let code = patterns::AUTH_CODE
        .captures(chunk)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            auth_url.as_deref().and_then(|url| {
                patterns::AUTH_CODE_PARAM
                    .captures(url)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
        });
    if let Some(code) = code {
        events.push(OutputEvent::AuthCode(code));
    }

    if patterns::AUTH_SUCCESS.is_match(chunk) {
        events.push(OutputEvent::AuthSuccess);
    }

    let mut players = ctx.players.to_vec();
    let mut changed = false;

    for line in chunk.lines() {
        let Some((action, name)) = match_player_line(line) else {
            continue;
        };

        match action {
            PlayerAction::Joined => {
                let lower = name.to_lowercase();
                if !players.iter().any(|p| p.name.to_lowercase() == lower) {
                    players.push(Player {
                        name: name.clone(),
                        joined_at: ctx.now,
                    });
                    events.push(OutputEvent::PlayerJoined(name));
                    changed = true;
                }
            }
            PlayerAction::Left => {
                let before = players.len();
                players.retain(|p| !leave_matches(&p.name, &name, ctx.leave_match));
                if players.len() != before {
                    events.push(OutputEvent::PlayerLeft(name));
                    changed = true;
                }
            }
        }
    }

    if changed {
        events.push(OutputEvent::PlayersChanged);
    }

    ParseOutcome { events, players }
}

fn match_player_line(line: &str) -> Option<(PlayerAction, String)> {
    patterns::PLAYER_PATTERNS.iter().find_map(|(regex, action)| {
        let name = regex.captures(line)?.get(1)?.as_str();
        let name = name.trim_matches(|c: char| c.is_ascii_punctuation() && c != '_');
        (!name.is_empty()).then(|| (*action, name.to_string()))
    })
}

fn leave_matches(existing: &str, leaving: &str, mode: LeaveMatch) -> bool {
    let existing = existing.to_lowercase();
    let leaving = leaving.to_lowercase();
    match mode {
        LeaveMatch::Exact => existing == leaving,
        LeaveMatch::Substring => existing.contains(&leaving) || leaving.contains(&existing),
    }
}
