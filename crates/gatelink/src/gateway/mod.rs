//! Gateway connection.
//!
//! The protocol state machine lives in [`ConnectionManager`] and performs no
//! IO. [`GatewayClient`] drives it over tokio-tungstenite sockets, owns the
//! reconnect policy and hands events to the application.

mod client;
mod events;
mod handle;
mod heartbeat;
mod manager;
mod policy;
mod queue;
mod reconnect;
mod session;
mod socket;
mod state;

pub use client::GatewayClient;
pub use events::{GatewayEvent, ManagerEvent};
pub use handle::GatewayHandle;
pub use heartbeat::{Beat, HeartbeatMonitor};
pub use manager::{
    Action, ConnectStart, ConnectionManager, Credentials, DestroyOptions, Input, SocketId,
    TimerKind, TimerToken,
};
pub use policy::{
    classify, classify_close, reconnect_delay, CloseAction, INVALID_SHARD_DELAY, RECONNECT_DELAY,
};
pub use queue::{OutboundEntry, OutboundQueue, DRAIN_INTERVAL};
pub use reconnect::ReconnectConfig;
pub use session::SessionState;
pub use state::{AtomicConnectionStatus, ConnectionStatus, SharedStatus};
