//! Cloneable handle to a running [`GatewayClient`](super::GatewayClient).

use std::sync::Arc;
use std::time::Duration;

use gatelink_proto::Frame;
use tokio::sync::mpsc;

use crate::error::GatewayError;

use super::state::{ConnectionStatus, SharedStatus};

/// Requests from handles to the driver.
#[derive(Debug)]
pub(crate) enum Command {
    Send { frame: Frame, high_priority: bool },
    Shutdown,
}

/// Handle for sending frames to, and observing, a gateway connection.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedStatus>,
}

impl GatewayHandle {
    pub(crate) const fn new(
        commands: mpsc::UnboundedSender<Command>,
        shared: Arc<SharedStatus>,
    ) -> Self {
        Self { commands, shared }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status()
    }

    /// Round trip of the last acknowledged heartbeat.
    #[must_use]
    pub fn ping(&self) -> Option<Duration> {
        self.shared.latency()
    }

    /// Queue a frame behind anything already waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has stopped.
    pub fn send(&self, frame: Frame) -> Result<(), GatewayError> {
        self.command(Command::Send {
            frame,
            high_priority: false,
        })
    }

    /// Queue a frame ahead of everything waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has stopped.
    pub fn send_priority(&self, frame: Frame) -> Result<(), GatewayError> {
        self.command(Command::Send {
            frame,
            high_priority: true,
        })
    }

    /// Close the connection with code 1000 and stop reconnecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has already stopped.
    pub fn shutdown(&self) -> Result<(), GatewayError> {
        self.command(Command::Shutdown)
    }

    fn command(&self, command: Command) -> Result<(), GatewayError> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::Connectivity("gateway client has stopped".to_string()))
    }
}
