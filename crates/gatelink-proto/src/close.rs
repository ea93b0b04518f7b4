//! Socket close events and the close codes the gateway uses.

use serde::{Deserialize, Serialize};

/// Clean close requested by either side.
pub const NORMAL: u16 = 1000;
/// No close frame was received.
pub const NO_STATUS: u16 = 1005;
/// The connection dropped without a close handshake.
pub const ABNORMAL: u16 = 1006;
/// Used locally when a frame had to be sent with no open socket.
pub const NO_TRANSPORT: u16 = 4000;
/// Session timed out; also used locally for zombie and HELLO timeouts.
pub const SESSION_TIMEOUT: u16 = 4009;
/// Shard rejected; reconnect with a longer delay.
pub const INVALID_SHARD: u16 = 4010;

/// Codes after which the connection must never be retried.
pub const TERMINAL_CODES: [u16; 6] = [4003, 4004, 4012, 4013, 4014, 4015];
/// Codes after which the session cannot be resumed.
pub const SESSION_RESET_CODES: [u16; 3] = [4007, SESSION_TIMEOUT, INVALID_SHARD];

/// A socket closure, produced once per physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseEvent {
    /// Close code.
    pub code: u16,
    /// Whether the close handshake completed.
    pub was_clean: bool,
    /// Close reason, possibly empty.
    pub reason: String,
}

impl CloseEvent {
    /// Create a close event.
    #[must_use]
    pub fn new(code: u16, was_clean: bool, reason: impl Into<String>) -> Self {
        Self {
            code,
            was_clean,
            reason: reason.into(),
        }
    }

    /// Connection lost without a close frame.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ABNORMAL, false, reason)
    }
}

impl std::fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {} (no reason received)", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abnormal_close() {
        let event = CloseEvent::abnormal("connection reset by peer");
        assert_eq!(event.code, ABNORMAL);
        assert!(!event.was_clean);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            CloseEvent::new(4004, true, "authentication failed").to_string(),
            "code 4004: authentication failed"
        );
        assert_eq!(
            CloseEvent::new(1000, true, "").to_string(),
            "code 1000 (no reason received)"
        );
    }

    #[test]
    fn test_code_sets_are_disjoint() {
        for code in SESSION_RESET_CODES {
            assert!(!TERMINAL_CODES.contains(&code));
        }
        assert!(!TERMINAL_CODES.contains(&NO_TRANSPORT));
    }
}
