//! Session identity carried across physical connections.

use gatelink_proto::NO_SEQUENCE;

/// Session id and sequence bookkeeping.
///
/// `sequence` only grows while a socket is open. When the socket goes away
/// the last value moves into `close_sequence`, which is what a RESUME sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    session_id: Option<String>,
    sequence: i64,
    close_sequence: i64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            session_id: None,
            sequence: NO_SEQUENCE,
            close_sequence: 0,
        }
    }
}

impl SessionState {
    /// Empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session id.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last sequence seen on the current socket, or [`NO_SEQUENCE`].
    #[must_use]
    pub const fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Last sequence seen before the previous close.
    #[must_use]
    pub const fn close_sequence(&self) -> i64 {
        self.close_sequence
    }

    /// Record the id assigned by READY.
    pub fn start(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
    }

    /// Record a frame's sequence. Returns true if it advanced.
    pub fn observe(&mut self, sequence: i64) -> bool {
        if sequence > self.sequence {
            self.sequence = sequence;
            true
        } else {
            false
        }
    }

    /// Remember the live sequence for a later RESUME.
    pub fn cache_close_sequence(&mut self) {
        if self.sequence != NO_SEQUENCE {
            self.close_sequence = self.sequence;
        }
    }

    /// Socket closed: cache the sequence and start counting afresh.
    pub fn on_close(&mut self) {
        self.cache_close_sequence();
        self.sequence = NO_SEQUENCE;
    }

    /// Forget the session id; the next handshake will IDENTIFY.
    pub fn invalidate(&mut self) {
        self.session_id = None;
    }

    /// Forget session id and sequence.
    pub fn reset(&mut self) {
        self.sequence = NO_SEQUENCE;
        self.session_id = None;
    }
}
