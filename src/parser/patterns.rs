//! Regex tables for the server's console format.
//!
//! The game server's log format is not versioned. When it changes, these
//! tables and the cases in `tests/parser_tests.rs` are what need updating.

use regex::Regex;
use std::sync::LazyLock;

/// Terminal control sequences: CSI, OSC and two-byte escapes.
pub(crate) static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("valid ansi regex")
});

pub(crate) static READY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)done \(|server online on port|\bserver (?:is )?ready\b|ready for connections")
        .expect("valid ready regex")
});

pub(crate) static AUTH_REQUIRED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)no server tokens configured|server authentication required|not authenticated|use /auth login",
    )
    .expect("valid auth-required regex")
});

pub(crate) static AUTH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://oauth\.accounts\.hytale\.com/oauth2/device/verify[^\s"'<>]*"#)
        .expect("valid auth-url regex")
});

pub(crate) static AUTH_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:authorization code|enter (?:the )?code|user code)\s*[:=]?\s*([a-z0-9]{4,}(?:-[a-z0-9]{4,})?)\b",
    )
    .expect("valid auth-code regex")
});

pub(crate) static AUTH_CODE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]user_code=([A-Za-z0-9-]+)").expect("valid user_code regex"));

pub(crate) static AUTH_SUCCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)authentication successful|successfully authenticated|authenticated as ")
        .expect("valid auth-success regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayerAction {
    Joined,
    Left,
}

/// Player join/leave alternatives in priority order; the first match on a
/// line wins.
pub(crate) static PLAYER_PATTERNS: LazyLock<Vec<(Regex, PlayerAction)>> = LazyLock::new(|| {
    let table = [
        (r"(?i)adding player '([^']+)'", PlayerAction::Joined),
        (r"(?i)removing player '([^']+)'", PlayerAction::Left),
        (r"(?i)player '?([^'\s]+)'? (?:has )?joined", PlayerAction::Joined),
        (r"(?i)player '?([^'\s]+)'? (?:has )?(?:left|disconnected)", PlayerAction::Left),
        (r"(?i)client connected: '?([^'\s,]+)", PlayerAction::Joined),
        (r"(?i)client disconnected: '?([^'\s,]+)", PlayerAction::Left),
    ];

    table
        .into_iter()
        .map(|(pattern, action)| (Regex::new(pattern).expect("valid player regex"), action))
        .collect()
});
