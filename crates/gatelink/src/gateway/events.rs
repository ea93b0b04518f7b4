//! Gateway event types.

use std::time::Duration;

use gatelink_proto::{CloseEvent, Frame};
use serde_json::Value;

use crate::error::GatewayError;

/// Lifecycle signals raised by the [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    /// READY received; a new session started.
    Ready {
        /// Server-assigned session id.
        session_id: String,
        /// Full READY payload.
        data: Value,
    },
    /// RESUMED received; the session was reattached.
    Resumed {
        /// Events replayed since the previous close, when known.
        replayed: Option<i64>,
    },
    /// The socket closed.
    Closed(CloseEvent),
    /// Destroyed without a socket that could report a close.
    Destroyed,
    /// Application event.
    Dispatch {
        /// Event name.
        event: String,
        /// Event payload.
        data: Value,
        /// Sequence number.
        sequence: Option<i64>,
    },
    /// Every decoded inbound frame.
    Raw(Frame),
    /// A recoverable failure worth surfacing.
    Error(GatewayError),
}

/// Events delivered to the application by [`GatewayClient`](super::GatewayClient).
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Connection became ready with a fresh session.
    Ready {
        /// Server-assigned session id.
        session_id: String,
        /// Full READY payload.
        data: Value,
    },
    /// Session resumed.
    Resumed {
        /// Events replayed since the previous close, when known.
        replayed: Option<i64>,
    },
    /// The socket closed; a reconnect decision follows.
    Closed(CloseEvent),
    /// The connection was torn down without a close event.
    Destroyed,
    /// Application event.
    Dispatch {
        /// Event name.
        event: String,
        /// Event payload.
        data: Value,
        /// Sequence number.
        sequence: Option<i64>,
    },
    /// Raw inbound frame (only when enabled in config).
    Raw(Frame),
    /// A reconnect is scheduled.
    Reconnecting {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// The connection will not be retried.
    Disconnected(CloseEvent),
    /// Recoverable error.
    Error(GatewayError),
}

impl From<ManagerEvent> for GatewayEvent {
    fn from(event: ManagerEvent) -> Self {
        match event {
            ManagerEvent::Ready { session_id, data } => Self::Ready { session_id, data },
            ManagerEvent::Resumed { replayed } => Self::Resumed { replayed },
            ManagerEvent::Closed(close) => Self::Closed(close),
            ManagerEvent::Destroyed => Self::Destroyed,
            ManagerEvent::Dispatch {
                event,
                data,
                sequence,
            } => Self::Dispatch {
                event,
                data,
                sequence,
            },
            ManagerEvent::Raw(frame) => Self::Raw(frame),
            ManagerEvent::Error(err) => Self::Error(err),
        }
    }
}
