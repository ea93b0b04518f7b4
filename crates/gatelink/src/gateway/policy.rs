//! Close code classification.

use std::time::Duration;

use gatelink_proto::close::{INVALID_SHARD, NORMAL, SESSION_RESET_CODES, TERMINAL_CODES};

/// Delay before reconnecting after most closes.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);
/// Delay before reconnecting after [`INVALID_SHARD`].
pub const INVALID_SHARD_DELAY: Duration = Duration::from_millis(5000);

/// Recovery strategy for a closed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Never reconnect; tear down the whole logical session.
    Terminal,
    /// Reconnect with a fresh IDENTIFY.
    SessionReset,
    /// Reconnect and RESUME the session.
    Resumable,
}

/// Classify a close code on its own.
#[must_use]
pub fn classify(code: u16) -> CloseAction {
    if TERMINAL_CODES.contains(&code) {
        CloseAction::Terminal
    } else if SESSION_RESET_CODES.contains(&code) {
        CloseAction::SessionReset
    } else {
        CloseAction::Resumable
    }
}

/// Classify a close, taking into account whether the owner asked for it.
///
/// A 1000 close is only terminal when the owner has already shut down;
/// otherwise the gateway closed cleanly and the session is resumed.
#[must_use]
pub fn classify_close(code: u16, destroyed: bool) -> CloseAction {
    if code == NORMAL {
        if destroyed {
            CloseAction::Terminal
        } else {
            CloseAction::Resumable
        }
    } else {
        classify(code)
    }
}

/// Delay before the next connect, or `None` for terminal codes.
#[must_use]
pub fn reconnect_delay(code: u16) -> Option<Duration> {
    match classify(code) {
        CloseAction::Terminal => None,
        _ if code == INVALID_SHARD => Some(INVALID_SHARD_DELAY),
        _ => Some(RECONNECT_DELAY),
    }
}
