//! Heartbeat liveness tracking.

use std::time::Duration;

use tokio::time::Instant;

/// What to do with a heartbeat that is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Previous heartbeat was acknowledged; send.
    Send,
    /// Previous heartbeat is still outstanding but the caller forced a send.
    Forced,
    /// Previous heartbeat was never acknowledged: the connection is a zombie.
    Zombie,
}

/// Tracks acknowledgment and latency of heartbeats on one connection.
///
/// Survives reconnects; READY and RESUMED mark it acknowledged again.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Option<Duration>,
    last_acked: bool,
    last_ping_at: Option<Instant>,
    latency: Option<Duration>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self {
            interval: None,
            last_acked: true,
            last_ping_at: None,
            latency: None,
        }
    }
}

impl HeartbeatMonitor {
    /// Create a monitor with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cadence dictated by the last HELLO.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Whether the last heartbeat was acknowledged.
    #[must_use]
    pub const fn last_acked(&self) -> bool {
        self.last_acked
    }

    /// When the last heartbeat went out.
    #[must_use]
    pub const fn last_ping_at(&self) -> Option<Instant> {
        self.last_ping_at
    }

    /// Round trip of the last acknowledged heartbeat.
    #[must_use]
    pub const fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Store the cadence from HELLO.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = Some(interval);
    }

    /// Decide whether a due heartbeat may go out, and if so record it as
    /// outstanding. A [`Beat::Zombie`] leaves the state untouched.
    pub fn begin(&mut self, now: Instant, force: bool) -> Beat {
        let beat = match (self.last_acked, force) {
            (true, _) => Beat::Send,
            (false, true) => Beat::Forced,
            (false, false) => return Beat::Zombie,
        };
        self.last_acked = false;
        self.last_ping_at = Some(now);
        beat
    }

    /// Record an acknowledgment and return the measured round trip.
    pub fn ack(&mut self, now: Instant) -> Option<Duration> {
        self.last_acked = true;
        let latency = self
            .last_ping_at
            .map(|sent| now.saturating_duration_since(sent));
        if latency.is_some() {
            self.latency = latency;
        }
        latency
    }

    /// Treat the connection as healthy without a round trip (READY/RESUMED).
    pub fn mark_acked(&mut self) {
        self.last_acked = true;
    }
}
