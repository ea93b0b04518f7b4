//! Connection state machine.
//!
//! [`ConnectionManager`] owns the status, session, heartbeat monitor, outbound
//! queue and timers of a single logical gateway connection. It performs no IO:
//! the driver feeds it one [`Input`] at a time and carries out the queued
//! [`Action`]s (open a socket, send a frame, start a timer, raise an event).
//!
//! Every physical socket gets a fresh [`SocketId`] and every timer arm a fresh
//! token, so late inputs from a replaced socket or a cancelled timer are
//! recognised and dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use gatelink_proto::close::{NO_TRANSPORT, NORMAL, SESSION_TIMEOUT};
use gatelink_proto::{
    ClientProperties, CloseEvent, Frame, HelloPayload, IdentifyPayload, Intents, OpCode,
    ProtoError,
    ReadyPayload, ResumePayload, READY, RESUMED,
};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::GatewayError;

use super::events::ManagerEvent;
use super::heartbeat::{Beat, HeartbeatMonitor};
use super::queue::{OutboundQueue, DRAIN_INTERVAL};
use super::session::SessionState;
use super::state::{ConnectionStatus, SharedStatus};

/// Identifies one physical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Timers owned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fires if HELLO does not arrive in time.
    Hello,
    /// Periodic heartbeat.
    Heartbeat,
    /// Paces the outbound queue.
    Drain,
}

/// Token identifying one arming of a timer.
pub type TimerToken = u64;

/// Credentials and identity sent during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Token; without it the handshake cannot proceed.
    pub token: Option<String>,
    /// Shard index.
    pub shard: Option<u32>,
    /// Capability bitmask.
    pub intents: Intents,
    /// Client metadata.
    pub properties: ClientProperties,
}

/// Options for [`ConnectionManager::destroy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyOptions {
    /// Close code sent to the gateway.
    pub close_code: u16,
    /// Forget session id and sequence.
    pub reset: bool,
    /// Raise [`ManagerEvent::Destroyed`] when no close event will follow.
    pub emit: bool,
    /// Log the destroy.
    pub log: bool,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            close_code: NORMAL,
            reset: false,
            emit: true,
            log: true,
        }
    }
}

impl DestroyOptions {
    /// Destroy with the given close code.
    #[must_use]
    pub fn with_code(close_code: u16) -> Self {
        Self {
            close_code,
            ..Self::default()
        }
    }

    /// Also forget the session.
    #[must_use]
    pub const fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Do not raise a destroyed event.
    #[must_use]
    pub const fn silent(mut self) -> Self {
        self.emit = false;
        self.log = false;
        self
    }
}

/// Transition inputs from the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The socket finished opening.
    SocketOpened {
        /// Socket.
        socket: SocketId,
    },
    /// A frame was decoded.
    Frame {
        /// Socket.
        socket: SocketId,
        /// Frame.
        frame: Frame,
    },
    /// The socket reported a non-fatal error.
    SocketError {
        /// Socket.
        socket: SocketId,
        /// Error text.
        message: String,
    },
    /// The socket closed.
    SocketClosed {
        /// Socket.
        socket: SocketId,
        /// How it closed.
        event: CloseEvent,
    },
    /// A timer fired.
    TimerFired {
        /// Timer.
        kind: TimerKind,
        /// Arming it belongs to.
        token: TimerToken,
    },
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a socket to `url`.
    Open {
        /// New socket id.
        socket: SocketId,
        /// Full socket URL.
        url: String,
    },
    /// Write a frame.
    Transmit {
        /// Target socket.
        socket: SocketId,
        /// Frame.
        frame: Frame,
    },
    /// Close a socket.
    Close {
        /// Target socket.
        socket: SocketId,
        /// Close code.
        code: u16,
        /// Stop delivering its inputs; no close event is expected.
        detach: bool,
    },
    /// Arm a timer, replacing any previous arming of the same kind.
    StartTimer {
        /// Timer.
        kind: TimerKind,
        /// Token to report back on fire.
        token: TimerToken,
        /// Delay (and period when repeating).
        after: Duration,
        /// Fire every `after` until cancelled.
        repeat: bool,
    },
    /// Disarm a timer.
    CancelTimer {
        /// Timer.
        kind: TimerKind,
    },
    /// Raise an event.
    Emit(ManagerEvent),
}

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStart {
    /// Already ready on an open socket; nothing to do.
    AlreadyReady,
    /// A socket was open but not ready; the handshake was re-sent.
    Reidentify,
    /// A new socket is being opened.
    Opening(SocketId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Socket {
    id: SocketId,
    open: bool,
}

#[derive(Debug, Default)]
struct Timers {
    hello: Option<TimerToken>,
    heartbeat: Option<TimerToken>,
    drain: Option<TimerToken>,
    next: TimerToken,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerToken> {
        match kind {
            TimerKind::Hello => &mut self.hello,
            TimerKind::Heartbeat => &mut self.heartbeat,
            TimerKind::Drain => &mut self.drain,
        }
    }

    fn arm(&mut self, kind: TimerKind) -> TimerToken {
        self.next += 1;
        let token = self.next;
        *self.slot(kind) = Some(token);
        token
    }

    fn disarm(&mut self, kind: TimerKind) -> bool {
        self.slot(kind).take().is_some()
    }

    fn is_current(&mut self, kind: TimerKind, token: TimerToken) -> bool {
        *self.slot(kind) == Some(token)
    }
}

/// State machine for one logical gateway connection.
#[derive(Debug)]
pub struct ConnectionManager {
    credentials: Credentials,
    hello_timeout: Duration,
    raw_frames: bool,
    status: ConnectionStatus,
    shared: Arc<SharedStatus>,
    session: SessionState,
    heartbeat: HeartbeatMonitor,
    queue: OutboundQueue,
    timers: Timers,
    socket: Option<Socket>,
    closing: Option<SocketId>,
    next_socket: u64,
    connected_at: Option<Instant>,
    actions: VecDeque<Action>,
}

impl ConnectionManager {
    /// Create an idle manager.
    #[must_use]
    pub fn new(credentials: Credentials, hello_timeout: Duration) -> Self {
        Self {
            credentials,
            hello_timeout,
            raw_frames: false,
            status: ConnectionStatus::Idle,
            shared: Arc::new(SharedStatus::new()),
            session: SessionState::new(),
            heartbeat: HeartbeatMonitor::new(),
            queue: OutboundQueue::new(),
            timers: Timers::default(),
            socket: None,
            closing: None,
            next_socket: 0,
            connected_at: None,
            actions: VecDeque::new(),
        }
    }

    /// Raise [`ManagerEvent::Raw`] for every inbound frame.
    #[must_use]
    pub const fn with_raw_frames(mut self, enabled: bool) -> Self {
        self.raw_frames = enabled;
        self
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Status and latency as seen by handles.
    #[must_use]
    pub fn shared(&self) -> Arc<SharedStatus> {
        Arc::clone(&self.shared)
    }

    /// Session bookkeeping.
    #[must_use]
    pub const fn session(&self) -> &SessionState {
        &self.session
    }

    /// Heartbeat bookkeeping.
    #[must_use]
    pub const fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Frames waiting to be sent.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Whether a socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.socket.is_some_and(|s| s.open)
    }

    /// Replace the token used by later handshakes.
    pub fn set_token(&mut self, token: Option<String>) {
        self.credentials.token = token;
    }

    /// Next action for the driver.
    pub fn poll_action(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// All pending actions.
    pub fn take_actions(&mut self) -> VecDeque<Action> {
        std::mem::take(&mut self.actions)
    }

    /// Start connecting to `url`.
    ///
    /// A no-op when already ready on an open socket. With an open socket that
    /// is not ready, the handshake is re-sent on it instead of opening another.
    pub fn connect(&mut self, url: impl Into<String>) -> ConnectStart {
        if let Some(socket) = self.socket {
            if socket.open {
                if self.status == ConnectionStatus::Ready {
                    return ConnectStart::AlreadyReady;
                }
                debug!(socket = %socket.id, "open connection found, attempting an immediate identify");
                self.identify();
                return ConnectStart::Reidentify;
            }
            debug!(socket = %socket.id, "connection object found, cleaning up before continuing");
            self.destroy(DestroyOptions {
                emit: false,
                ..DestroyOptions::default()
            });
        }

        // a socket still closing from an earlier destroy no longer matters
        self.closing = None;

        self.next_socket += 1;
        let id = SocketId(self.next_socket);
        let url = url.into();
        info!(gateway = %url, socket = %id, "connecting to gateway");

        self.set_status(ConnectionStatus::Connecting);
        debug!(timeout_ms = self.hello_timeout.as_millis() as u64, "setting HELLO timeout");
        self.start_timer(TimerKind::Hello, self.hello_timeout, false);
        self.connected_at = Some(Instant::now());
        self.socket = Some(Socket { id, open: false });
        self.actions.push_back(Action::Open { socket: id, url });
        ConnectStart::Opening(id)
    }

    /// Feed one input.
    pub fn handle(&mut self, input: Input) {
        match input {
            Input::SocketOpened { socket } => self.on_open(socket),
            Input::Frame { socket, frame } => self.on_frame(socket, frame),
            Input::SocketError { socket, message } => {
                if self.is_tracked(socket) {
                    warn!(%socket, error = %message, "websocket error");
                    self.emit(ManagerEvent::Error(GatewayError::Connectivity(message)));
                }
            }
            Input::SocketClosed { socket, event } => self.on_close(socket, event),
            Input::TimerFired { kind, token } => self.on_timer(kind, token),
        }
    }

    /// Tear the connection down. Safe from any state; calling it twice is
    /// harmless.
    pub fn destroy(&mut self, options: DestroyOptions) {
        if options.log {
            debug!(
                close_code = options.close_code,
                reset = options.reset,
                emit = options.emit,
                "destroying connection"
            );
        }

        self.cancel_timer(TimerKind::Heartbeat);
        self.cancel_timer(TimerKind::Hello);
        self.clear_queue();

        match self.socket.take() {
            Some(socket) if socket.open => {
                // the close event arrives later through the socket
                self.actions.push_back(Action::Close {
                    socket: socket.id,
                    code: options.close_code,
                    detach: false,
                });
                self.closing = Some(socket.id);
            }
            Some(socket) => {
                debug!(socket = %socket.id, "socket was not open, detaching it");
                self.actions.push_back(Action::Close {
                    socket: socket.id,
                    code: options.close_code,
                    detach: true,
                });
                if options.emit {
                    self.emit(ManagerEvent::Destroyed);
                }
            }
            None => {
                if options.emit {
                    self.emit(ManagerEvent::Destroyed);
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        self.session.cache_close_sequence();
        if options.reset {
            self.session.reset();
        }
    }

    /// Forget the session id so the next handshake is a fresh IDENTIFY.
    pub fn invalidate_session(&mut self) {
        self.session.invalidate();
    }

    /// The owner has scheduled a retry.
    pub fn mark_reconnecting(&mut self) {
        if matches!(
            self.status,
            ConnectionStatus::Idle | ConnectionStatus::Disconnected
        ) {
            self.set_status(ConnectionStatus::Reconnecting);
        }
    }

    /// Queue a frame; high priority frames jump the queue.
    pub fn send(&mut self, frame: Frame, high_priority: bool) {
        if self.queue.enqueue(frame, high_priority) {
            self.process_queue();
        }
    }

    /// Send IDENTIFY, or RESUME when a session id is known.
    pub fn identify(&mut self) {
        if self.session.session_id().is_some() {
            self.identify_resume();
        } else {
            self.identify_new();
        }
    }

    /// Send a heartbeat. Without `force`, an unacknowledged previous heartbeat
    /// marks the connection as a zombie and destroys it instead.
    pub fn send_heartbeat(&mut self, tag: &str, force: bool) {
        match self.heartbeat.begin(Instant::now(), force) {
            Beat::Zombie => {
                let unacked_ms = self
                    .heartbeat
                    .last_ping_at()
                    .map(|at| at.elapsed().as_millis() as u64);
                warn!(
                    tag,
                    status = ?self.status,
                    sequence = self.session.sequence(),
                    unacked_ms = ?unacked_ms,
                    "heartbeat was not acknowledged, assuming zombie connection"
                );
                self.emit(ManagerEvent::Error(GatewayError::ZombieConnection));
                self.destroy(DestroyOptions::with_code(SESSION_TIMEOUT).reset());
                return;
            }
            Beat::Forced => debug!(tag, "heartbeat ack still outstanding, sending one anyway"),
            Beat::Send => debug!(tag, "sending heartbeat"),
        }
        self.send(Frame::heartbeat(self.session.sequence()), true);
    }

    /// Record a heartbeat acknowledgment.
    pub fn ack_heartbeat(&mut self) {
        if let Some(latency) = self.heartbeat.ack(Instant::now()) {
            debug!(latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
            self.shared.set_latency(latency);
        }
    }

    fn on_open(&mut self, socket: SocketId) {
        let Some(current) = self.socket.as_mut().filter(|s| s.id == socket) else {
            trace!(%socket, "ignoring open from a replaced socket");
            return;
        };
        current.open = true;
        let elapsed_ms = self
            .connected_at
            .map_or(0, |at| at.elapsed().as_millis() as u64);
        debug!(%socket, elapsed_ms, "websocket connected");
        self.set_status(ConnectionStatus::Nearly);
    }

    fn on_frame(&mut self, socket: SocketId, frame: Frame) {
        if !self.socket.is_some_and(|s| s.id == socket) {
            trace!(%socket, op = ?frame.op, "dropping frame from a replaced socket");
            return;
        }
        if self.raw_frames {
            self.emit(ManagerEvent::Raw(frame.clone()));
        }

        if frame.op == OpCode::Dispatch {
            match frame.event() {
                Some(READY) => self.on_ready(&frame),
                Some(RESUMED) => self.on_resumed(&frame),
                Some(event) => {
                    let event = event.to_string();
                    self.emit(ManagerEvent::Dispatch {
                        event,
                        data: frame.d.clone(),
                        sequence: frame.s,
                    });
                }
                None => debug!(sequence = ?frame.s, "dispatch frame without an event type"),
            }
        }

        if let Some(sequence) = frame.s {
            self.session.observe(sequence);
        }

        match frame.op {
            OpCode::Hello => self.on_hello(&frame),
            OpCode::Heartbeat if frame.a => self.ack_heartbeat(),
            OpCode::Heartbeat => self.send_heartbeat("HeartbeatRequest", true),
            OpCode::Dispatch => {}
            OpCode::Identify | OpCode::Resume => {
                debug!(op = ?frame.op, "ignoring client opcode sent by the gateway");
            }
        }
    }

    fn on_hello(&mut self, frame: &Frame) {
        let error = match frame.payload::<HelloPayload>("hello") {
            Ok(hello) if hello.heartbeat_interval > 0 => {
                self.cancel_timer(TimerKind::Hello);
                self.start_heartbeat(hello.heartbeat_interval);
                return;
            }
            Ok(_) => ProtoError::InvalidPayload {
                kind: "hello",
                reason: "heartbeat_interval must be positive".to_string(),
            },
            Err(e) => e,
        };

        // no heartbeat cadence means no liveness check; start over
        warn!(error = %error, "unusable HELLO, destroying and connecting again");
        self.emit(ManagerEvent::Error(error.into()));
        self.destroy(DestroyOptions::with_code(SESSION_TIMEOUT).reset());
    }

    fn start_heartbeat(&mut self, interval_ms: u64) {
        let interval = Duration::from_millis(interval_ms);
        debug!(interval_ms, "setting heartbeat interval");
        self.heartbeat.set_interval(interval);
        self.start_timer(TimerKind::Heartbeat, interval, true);
        self.identify();
    }

    fn on_ready(&mut self, frame: &Frame) {
        let ready = match frame.payload::<ReadyPayload>("ready") {
            Ok(ready) => ready,
            Err(e) => {
                warn!(error = %e, "malformed READY");
                self.emit(ManagerEvent::Error(e.into()));
                return;
            }
        };

        self.session.start(ready.session_id.clone());
        self.set_status(ConnectionStatus::Ready);
        info!(session_id = %ready.session_id, "session ready");
        self.emit(ManagerEvent::Ready {
            session_id: ready.session_id,
            data: frame.d.clone(),
        });
        self.heartbeat.mark_acked();
        self.send_heartbeat("ReadyHeartbeat", false);
    }

    fn on_resumed(&mut self, frame: &Frame) {
        let replayed = frame.s.map(|s| s - self.session.close_sequence());
        self.set_status(ConnectionStatus::Ready);
        info!(
            session_id = self.session.session_id().unwrap_or_default(),
            replayed = ?replayed,
            "session resumed"
        );
        self.emit(ManagerEvent::Resumed { replayed });
        self.heartbeat.mark_acked();
        self.send_heartbeat("ResumeHeartbeat", false);
    }

    fn on_close(&mut self, socket: SocketId, event: CloseEvent) {
        let current = self.socket.is_some_and(|s| s.id == socket);
        if !current && self.closing != Some(socket) {
            trace!(%socket, code = event.code, "ignoring close from a detached socket");
            return;
        }

        self.session.on_close();
        info!(
            code = event.code,
            clean = event.was_clean,
            reason = %event.reason,
            "gateway connection closed"
        );

        self.cancel_timer(TimerKind::Heartbeat);
        self.cancel_timer(TimerKind::Hello);
        self.clear_queue();
        if current {
            self.socket = None;
        }
        self.closing = None;
        self.set_status(ConnectionStatus::Disconnected);
        self.emit(ManagerEvent::Closed(event));
    }

    fn on_timer(&mut self, kind: TimerKind, token: TimerToken) {
        if !self.timers.is_current(kind, token) {
            trace!(timer = ?kind, token, "ignoring cancelled timer");
            return;
        }
        match kind {
            TimerKind::Hello => {
                self.timers.disarm(kind);
                warn!("did not receive HELLO in time, destroying and connecting again");
                self.destroy(DestroyOptions::with_code(SESSION_TIMEOUT).reset());
            }
            TimerKind::Heartbeat => {
                let force = self.status.is_handshaking();
                self.send_heartbeat("HeartbeatTimer", force);
            }
            TimerKind::Drain => {
                self.timers.disarm(kind);
                self.process_queue();
            }
        }
    }

    fn identify_new(&mut self) {
        let Some(token) = self.credentials.token.clone() else {
            warn!("no token available to identify a new session");
            return;
        };

        self.set_status(ConnectionStatus::Identifying);
        let payload = IdentifyPayload {
            token,
            intents: self.credentials.intents,
            shard: self.credentials.shard,
            properties: self.credentials.properties.clone(),
        };
        match Frame::identify(&payload) {
            Ok(frame) => {
                debug!(shard = ?payload.shard, intents = payload.intents.bits(), "identifying");
                self.send(frame, true);
            }
            Err(e) => self.emit(ManagerEvent::Error(e.into())),
        }
    }

    fn identify_resume(&mut self) {
        let Some(session_id) = self.session.session_id().map(str::to_owned) else {
            debug!("no session id present, identifying as a new session");
            self.identify_new();
            return;
        };
        let Some(token) = self.credentials.token.clone() else {
            warn!(%session_id, "no token available to resume the session");
            return;
        };

        self.set_status(ConnectionStatus::Resuming);
        let seq = self.session.close_sequence();
        debug!(%session_id, seq, "resuming session");
        let payload = ResumePayload {
            token,
            session_id,
            seq,
        };
        match Frame::resume(&payload) {
            Ok(frame) => self.send(frame, true),
            Err(e) => self.emit(ManagerEvent::Error(e.into())),
        }
    }

    fn process_queue(&mut self) {
        let Some(entry) = self.queue.next() else {
            return;
        };
        trace!(
            op = ?entry.frame.op,
            high_priority = entry.high_priority,
            remaining = self.queue.len(),
            "draining outbound queue"
        );
        self.transmit(entry.frame);
        if !self.queue.is_empty() {
            self.start_timer(TimerKind::Drain, DRAIN_INTERVAL, false);
        }
    }

    fn transmit(&mut self, frame: Frame) {
        match self.socket {
            Some(Socket { id, open: true }) => {
                self.actions.push_back(Action::Transmit { socket: id, frame });
            }
            _ => {
                warn!(op = ?frame.op, "tried to send a frame but no websocket is available");
                self.emit(ManagerEvent::Error(GatewayError::TransportUnavailable));
                self.destroy(DestroyOptions::with_code(NO_TRANSPORT));
            }
        }
    }

    fn clear_queue(&mut self) {
        self.cancel_timer(TimerKind::Drain);
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarding frames queued for a dead socket");
        }
    }

    fn start_timer(&mut self, kind: TimerKind, after: Duration, repeat: bool) {
        let token = self.timers.arm(kind);
        self.actions.push_back(Action::StartTimer {
            kind,
            token,
            after,
            repeat,
        });
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if self.timers.disarm(kind) {
            trace!(timer = ?kind, "clearing timer");
            self.actions.push_back(Action::CancelTimer { kind });
        }
    }

    fn is_tracked(&self, socket: SocketId) -> bool {
        self.socket.is_some_and(|s| s.id == socket) || self.closing == Some(socket)
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.shared.set_status(status);
    }

    fn emit(&mut self, event: ManagerEvent) {
        self.actions.push_back(Action::Emit(event));
    }
}
