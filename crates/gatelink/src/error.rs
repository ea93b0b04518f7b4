//! Error types for gatelink.

use gatelink_proto::{CloseEvent, ProtoError};
use thiserror::Error;

/// Errors that can occur while maintaining the gateway connection.
///
/// Most are reported as events and recovered by reconnecting.
/// [`GatewayClient::run`](crate::gateway::GatewayClient::run) ends on a
/// terminal close, a credential or configuration error, or once connectivity
/// failures exhaust the reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Gateway discovery answered 401.
    #[error("invalid credential: the gateway rejected the token")]
    InvalidCredential,

    /// No token was configured for an authenticated request.
    #[error("no credential configured")]
    MissingCredential,

    /// Discovery or socket connection failed.
    #[error("gateway connectivity failure: {0}")]
    Connectivity(String),

    /// A heartbeat went unacknowledged for a full interval.
    #[error("zombie connection: heartbeat was not acknowledged")]
    ZombieConnection,

    /// The gateway closed with a code that forbids reconnecting.
    #[error("gateway closed the session permanently ({0})")]
    TerminalClose(CloseEvent),

    /// A frame was due to be sent while no socket was open.
    #[error("no open transport to send on")]
    TransportUnavailable,

    /// The socket closed before the handshake completed.
    #[error("connection closed during handshake ({0})")]
    Closed(CloseEvent),

    /// The connection was destroyed before the handshake completed.
    #[error("connection destroyed before becoming ready")]
    Destroyed,

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl GatewayError {
    /// Whether the outer reconnect loop should try again after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidCredential | Self::MissingCredential | Self::TerminalClose(_) | Self::Config(_)
        )
    }
}
