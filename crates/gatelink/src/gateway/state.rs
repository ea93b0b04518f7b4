//! Connection status types.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

/// Status of the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Never connected.
    Idle,
    /// Socket is being opened.
    Connecting,
    /// Socket is open, waiting for HELLO.
    Nearly,
    /// IDENTIFY sent, waiting for READY.
    Identifying,
    /// RESUME sent, waiting for RESUMED.
    Resuming,
    /// Session established.
    Ready,
    /// A reconnect has been scheduled.
    Reconnecting,
    /// No socket.
    Disconnected,
}

impl ConnectionStatus {
    /// Whether a handshake frame is in flight.
    #[must_use]
    pub const fn is_handshaking(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming)
    }
}

/// Atomic wrapper for connection status, shared with handles.
#[derive(Debug)]
pub struct AtomicConnectionStatus(AtomicU8);

impl AtomicConnectionStatus {
    /// Create a new atomic status.
    #[must_use]
    pub const fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Load the current status.
    #[must_use]
    pub fn load(&self) -> ConnectionStatus {
        match self.0.load(Ordering::SeqCst) {
            0 => ConnectionStatus::Idle,
            1 => ConnectionStatus::Connecting,
            2 => ConnectionStatus::Nearly,
            3 => ConnectionStatus::Identifying,
            4 => ConnectionStatus::Resuming,
            5 => ConnectionStatus::Ready,
            6 => ConnectionStatus::Reconnecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    /// Store a new status.
    pub fn store(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

const NO_LATENCY: u64 = u64::MAX;

/// Status and heartbeat latency published by the manager for handles.
#[derive(Debug)]
pub struct SharedStatus {
    status: AtomicConnectionStatus,
    latency_ms: AtomicU64,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStatus {
    /// Idle, no latency measured.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: AtomicConnectionStatus::new(ConnectionStatus::Idle),
            latency_ms: AtomicU64::new(NO_LATENCY),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    /// Publish a status change.
    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status);
    }

    /// Last measured heartbeat round trip.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        match self.latency_ms.load(Ordering::Relaxed) {
            NO_LATENCY => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Publish a heartbeat round trip.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(NO_LATENCY - 1);
        self.latency_ms.store(ms.min(NO_LATENCY - 1), Ordering::Relaxed);
    }
}
