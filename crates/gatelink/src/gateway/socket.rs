//! One task per physical websocket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gatelink_proto::close::NO_STATUS;
use gatelink_proto::{CloseEvent, Frame};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use super::manager::{Input, SocketId};

/// How long a peer gets to answer our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands from the driver to a socket task.
#[derive(Debug)]
pub(crate) enum SocketCommand {
    Send(String),
    Close(u16),
}

/// Sender half kept by the driver. Dropping it detaches the socket.
pub(crate) type SocketTx = mpsc::UnboundedSender<SocketCommand>;

/// Open `url` in a new task. Everything the socket observes comes back on
/// `inputs`, tagged with `id`; the last input is always `SocketClosed`
/// unless the socket was detached.
pub(crate) fn spawn(id: SocketId, url: String, inputs: mpsc::UnboundedSender<Input>) -> SocketTx {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        socket_task(id, url, rx, inputs).await;
    });
    tx
}

async fn socket_task(
    id: SocketId,
    url: String,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
    inputs: mpsc::UnboundedSender<Input>,
) {
    let stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            debug!(socket = %id, error = %e, "failed to open websocket");
            let _ = inputs.send(Input::SocketClosed {
                socket: id,
                event: CloseEvent::abnormal(format!("failed to connect: {e}")),
            });
            return;
        }
    };
    if inputs.send(Input::SocketOpened { socket: id }).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();
    let mut received_close: Option<CloseEvent> = None;
    let mut sent_close: Option<(u16, Instant)> = None;

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let input = match Frame::from_json(&text) {
                        Ok(frame) => Input::Frame { socket: id, frame },
                        Err(e) => Input::SocketError {
                            socket: id,
                            message: format!("undecodable frame: {e}"),
                        },
                    };
                    if inputs.send(input).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    received_close = Some(match frame {
                        Some(frame) => CloseEvent::new(u16::from(frame.code), true, frame.reason.to_string()),
                        None => CloseEvent::new(NO_STATUS, true, ""),
                    });
                }
                Some(Ok(other)) => trace!(socket = %id, kind = ?other, "ignoring non-text message"),
                Some(Err(e)) => {
                    debug!(socket = %id, error = %e, "websocket read failed");
                    if received_close.is_none() {
                        received_close = Some(CloseEvent::abnormal(e.to_string()));
                    }
                    break;
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        let _ = inputs.send(Input::SocketError {
                            socket: id,
                            message: format!("write failed: {e}"),
                        });
                        break;
                    }
                }
                Some(SocketCommand::Close(code)) => {
                    // keep reading until the peer answers the close
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    if write.send(Message::Close(Some(frame))).await.is_err() {
                        break;
                    }
                    sent_close = Some((code, Instant::now() + CLOSE_TIMEOUT));
                }
                None => {
                    trace!(socket = %id, "socket detached");
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
            },
            () = close_deadline(sent_close) => {
                if let Some((code, _)) = sent_close {
                    debug!(socket = %id, code, "peer did not answer the close frame");
                    received_close = Some(CloseEvent::new(code, false, "close handshake timed out"));
                }
                break;
            }
        }
    }

    let event = received_close.unwrap_or_else(|| CloseEvent::abnormal("connection lost"));
    let _ = inputs.send(Input::SocketClosed { socket: id, event });
}

async fn close_deadline(sent_close: Option<(u16, Instant)>) {
    match sent_close {
        Some((_, deadline)) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
