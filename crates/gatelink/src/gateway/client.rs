//! Gateway driver and reconnect owner.
//!
//! [`GatewayClient`] runs the [`ConnectionManager`] on a single task. Socket
//! tasks, timers and handle commands are multiplexed with `tokio::select!` and
//! fed to the manager one at a time; the resulting actions are carried out
//! before the next input is taken.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use gatelink_proto::close::NORMAL;
use gatelink_proto::CloseEvent;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::GatewayConfig;
use crate::discovery::{socket_url, GatewayDiscovery};
use crate::error::GatewayError;

use super::events::{GatewayEvent, ManagerEvent};
use super::handle::{Command, GatewayHandle};
use super::manager::{
    Action, ConnectStart, ConnectionManager, DestroyOptions, Input, SocketId, TimerKind,
    TimerToken,
};
use super::policy::{classify_close, reconnect_delay, CloseAction, RECONNECT_DELAY};
use super::reconnect::ReconnectConfig;
use super::socket::{self, SocketCommand, SocketTx};
use super::state::ConnectionStatus;

#[derive(Debug)]
struct Timer {
    token: TimerToken,
    deadline: Instant,
    period: Option<Duration>,
}

enum Wake {
    Input(Input),
    Command(Command),
    Timers,
}

enum Ended {
    Closed(CloseEvent),
    Destroyed,
}

/// Client for one logical gateway session.
pub struct GatewayClient<D> {
    discovery: D,
    version: u8,
    reconnect: ReconnectConfig,
    manager: ConnectionManager,
    sockets: HashMap<SocketId, SocketTx>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    timers: HashMap<TimerKind, Timer>,
    pending: VecDeque<ManagerEvent>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    shutting_down: bool,
}

impl<D: GatewayDiscovery> GatewayClient<D> {
    /// Create a client and the receiver for its events.
    ///
    /// The event channel is unbounded: a slow reader never holds up
    /// heartbeats or socket input.
    #[must_use]
    pub fn new(
        config: &GatewayConfig,
        discovery: D,
    ) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let manager = ConnectionManager::new(config.credentials(), config.hello_timeout())
            .with_raw_frames(config.raw_frames);
        debug!(
            token = config.masked_token().as_deref().unwrap_or("<none>"),
            shard = ?config.shard,
            "gateway client created"
        );

        let client = Self {
            discovery,
            version: config.version,
            reconnect: ReconnectConfig::from(&config.reconnect),
            manager,
            sockets: HashMap::new(),
            inputs_tx,
            inputs_rx,
            commands_tx,
            commands_rx,
            timers: HashMap::new(),
            pending: VecDeque::new(),
            events,
            shutting_down: false,
        };
        (client, events_rx)
    }

    /// A handle for sending frames and shutting down.
    #[must_use]
    pub fn handle(&self) -> GatewayHandle {
        GatewayHandle::new(self.commands_tx.clone(), self.manager.shared())
    }

    /// Current connection status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.manager.status()
    }

    /// Discover the gateway and connect, returning once the session is ready
    /// or resumed.
    ///
    /// # Errors
    ///
    /// Returns the discovery error, or [`GatewayError::Closed`] /
    /// [`GatewayError::Destroyed`] if the connection ended before becoming
    /// ready.
    pub async fn connect(&mut self) -> Result<(), GatewayError> {
        let base = self.discovery.gateway_url().await?;
        let url = socket_url(&base, self.version)?;

        if self.manager.connect(url.as_str()) == ConnectStart::AlreadyReady {
            return Ok(());
        }
        self.apply_actions();

        loop {
            match self.next_event().await {
                ManagerEvent::Closed(close) => {
                    self.emit(GatewayEvent::Closed(close.clone()));
                    return Err(GatewayError::Closed(close));
                }
                ManagerEvent::Destroyed => {
                    self.emit(GatewayEvent::Destroyed);
                    return Err(GatewayError::Destroyed);
                }
                event @ (ManagerEvent::Ready { .. } | ManagerEvent::Resumed { .. }) => {
                    self.emit(event.into());
                    return Ok(());
                }
                event => self.emit(event.into()),
            }
        }
    }

    /// Keep the session alive until shutdown or a terminal close.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::TerminalClose`] when the gateway refuses the
    /// session, the credential errors from discovery, and the last
    /// connectivity error once the reconnect attempts are exhausted.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let mut failures = 0u32;

        loop {
            if self.shutting_down {
                return self.stopped();
            }

            let ended = match self.connect().await {
                Ok(()) => {
                    failures = 0;
                    self.serve().await
                }
                Err(GatewayError::Closed(close)) => Ended::Closed(close),
                Err(GatewayError::Destroyed) => Ended::Destroyed,
                Err(err) if err.is_retryable() => {
                    failures += 1;
                    if !self.reconnect.should_reconnect(failures) {
                        error!(error = %err, failures, "giving up on reaching the gateway");
                        return Err(err);
                    }
                    let delay = self.reconnect.delay_for_attempt(failures);
                    warn!(error = %err, failures, "failed to reach the gateway");
                    self.emit(GatewayEvent::Error(err));
                    if self.wait_to_reconnect(delay).await {
                        return self.stopped();
                    }
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "cannot connect to the gateway");
                    return Err(err);
                }
            };

            let delay = match ended {
                Ended::Closed(close) => match self.on_closed(close)? {
                    Some(delay) => delay,
                    None => return Ok(()),
                },
                Ended::Destroyed if self.shutting_down => return self.stopped(),
                Ended::Destroyed => RECONNECT_DELAY,
            };

            if self.wait_to_reconnect(delay).await {
                return self.stopped();
            }
        }
    }

    /// Forward events until the connection ends.
    async fn serve(&mut self) -> Ended {
        loop {
            match self.next_event().await {
                ManagerEvent::Closed(close) => {
                    self.emit(GatewayEvent::Closed(close.clone()));
                    return Ended::Closed(close);
                }
                ManagerEvent::Destroyed => {
                    self.emit(GatewayEvent::Destroyed);
                    return Ended::Destroyed;
                }
                event => self.emit(event.into()),
            }
        }
    }

    /// Apply the close policy. `None` means stop without error.
    fn on_closed(&mut self, close: CloseEvent) -> Result<Option<Duration>, GatewayError> {
        let action = classify_close(close.code, self.shutting_down);

        if self.shutting_down || action == CloseAction::Terminal {
            self.emit(GatewayEvent::Disconnected(close.clone()));
            if self.shutting_down {
                info!(code = close.code, "gateway connection shut down");
                return Ok(None);
            }
            error!(code = close.code, reason = %close.reason, "gateway closed the session permanently");
            return Err(GatewayError::TerminalClose(close));
        }

        if action == CloseAction::SessionReset {
            debug!(code = close.code, "session can not be resumed, identifying afresh");
            self.manager.invalidate_session();
        }

        if self.manager.session().session_id().is_none() {
            self.manager
                .destroy(DestroyOptions::default().reset().silent());
            self.apply_actions();
        }

        Ok(Some(reconnect_delay(close.code).unwrap_or(RECONNECT_DELAY)))
    }

    /// Sleep before the next connect while still serving commands.
    /// Returns true if shutdown was requested meanwhile.
    async fn wait_to_reconnect(&mut self, delay: Duration) -> bool {
        self.manager.mark_reconnecting();
        info!(delay_ms = delay.as_millis() as u64, "reconnecting to the gateway");
        self.emit(GatewayEvent::Reconnecting { delay });

        let deadline = Instant::now() + delay;
        loop {
            self.flush_pending();
            if self.shutting_down {
                return true;
            }
            tokio::select! {
                () = sleep_until(deadline) => return false,
                wake = self.next_wake() => self.on_wake(wake),
            }
        }
    }

    fn stopped(&mut self) -> Result<(), GatewayError> {
        self.flush_pending();
        self.emit(GatewayEvent::Disconnected(CloseEvent::new(
            NORMAL, true, "shutdown",
        )));
        info!("gateway client stopped");
        Ok(())
    }

    async fn next_event(&mut self) -> ManagerEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let wake = self.next_wake().await;
            self.on_wake(wake);
        }
    }

    async fn next_wake(&mut self) -> Wake {
        let deadline = self.timers.values().map(|t| t.deadline).min();
        tokio::select! {
            Some(input) = self.inputs_rx.recv() => Wake::Input(input),
            Some(command) = self.commands_rx.recv() => Wake::Command(command),
            () = sleep_until_some(deadline) => Wake::Timers,
        }
    }

    fn on_wake(&mut self, wake: Wake) {
        match wake {
            Wake::Input(input) => {
                if let Input::SocketClosed { socket, .. } = &input {
                    self.sockets.remove(socket);
                }
                self.manager.handle(input);
            }
            Wake::Command(Command::Send {
                frame,
                high_priority,
            }) => self.manager.send(frame, high_priority),
            Wake::Command(Command::Shutdown) => {
                info!("shutting down gateway connection");
                self.shutting_down = true;
                self.manager.set_token(None);
                self.manager.destroy(DestroyOptions::with_code(NORMAL));
            }
            Wake::Timers => self.fire_timers(),
        }
        self.apply_actions();
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        let due: Vec<(TimerKind, TimerToken)> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.deadline <= now)
            .map(|(kind, timer)| (*kind, timer.token))
            .collect();

        for (kind, token) in due {
            if let Some(timer) = self.timers.get_mut(&kind) {
                match timer.period {
                    Some(period) => {
                        timer.deadline += period;
                        if timer.deadline <= now {
                            timer.deadline = now + period;
                        }
                    }
                    None => {
                        self.timers.remove(&kind);
                    }
                }
            }
            self.manager.handle(Input::TimerFired { kind, token });
        }
    }

    fn apply_actions(&mut self) {
        while let Some(action) = self.manager.poll_action() {
            match action {
                Action::Open { socket, url } => {
                    let tx = socket::spawn(socket, url, self.inputs_tx.clone());
                    self.sockets.insert(socket, tx);
                }
                Action::Transmit { socket, frame } => match frame.to_json() {
                    Ok(text) => {
                        trace!(%socket, op = ?frame.op, "sending frame");
                        let sent = self
                            .sockets
                            .get(&socket)
                            .is_some_and(|tx| tx.send(SocketCommand::Send(text)).is_ok());
                        if !sent {
                            debug!(%socket, "socket task is gone, frame dropped");
                        }
                    }
                    Err(e) => self.pending.push_back(ManagerEvent::Error(e.into())),
                },
                Action::Close {
                    socket,
                    code,
                    detach,
                } => {
                    if detach {
                        self.sockets.remove(&socket);
                    } else if let Some(tx) = self.sockets.get(&socket) {
                        let _ = tx.send(SocketCommand::Close(code));
                    }
                }
                Action::StartTimer {
                    kind,
                    token,
                    after,
                    repeat,
                } => {
                    self.timers.insert(
                        kind,
                        Timer {
                            token,
                            deadline: Instant::now() + after,
                            period: repeat.then_some(after),
                        },
                    );
                }
                Action::CancelTimer { kind } => {
                    self.timers.remove(&kind);
                }
                Action::Emit(event) => self.pending.push_back(event),
            }
        }
    }

    fn flush_pending(&mut self) {
        while let Some(event) = self.pending.pop_front() {
            self.emit(event.into());
        }
    }

    fn emit(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
