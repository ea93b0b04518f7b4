//! Gateway integration tests.
//!
//! Runs the client against a mock WebSocket gateway and checks the frames it
//! sends and the events it raises across handshakes, closes and reconnects.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use gatelink::gateway::{ConnectionStatus, GatewayClient, GatewayEvent};
use gatelink::proto::{Frame, OpCode, READY, RESUMED};
use gatelink::{GatewayConfig, GatewayError, HttpDiscovery, StaticGateway};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Gateway Server
// ============================================================================

/// A mock gateway server for testing.
struct MockGateway {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockGateway {
    async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock gateway");
        let addr = listener.local_addr().expect("no local addr");
        Self { listener, addr }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("accept failed");
        accept_async(stream).await.expect("websocket handshake failed")
    }
}

async fn send_frame(ws: &mut WebSocketStream<TcpStream>, frame: &Frame) {
    let json = frame.to_json().expect("failed to encode frame");
    ws.send(Message::Text(json)).await.expect("send failed");
}

/// Next frame the client sends.
async fn recv_frame(ws: &mut WebSocketStream<TcpStream>) -> Frame {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Frame::from_json(&text).expect("client sent an invalid frame");
                }
                Some(Ok(Message::Close(frame))) => panic!("client closed: {frame:?}"),
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

/// Next frame with the given opcode, skipping heartbeats and the like.
async fn recv_op(ws: &mut WebSocketStream<TcpStream>, op: OpCode) -> Frame {
    loop {
        let frame = recv_frame(ws).await;
        if frame.op == op {
            return frame;
        }
    }
}

/// Send HELLO and return the IDENTIFY or RESUME that answers it.
async fn hello(ws: &mut WebSocketStream<TcpStream>, interval_ms: u64) -> Frame {
    send_frame(ws, &Frame::hello(interval_ms)).await;
    loop {
        let frame = recv_frame(ws).await;
        if matches!(frame.op, OpCode::Identify | OpCode::Resume) {
            return frame;
        }
    }
}

/// Wait for the client's close frame and finish the close handshake.
async fn recv_close(ws: &mut WebSocketStream<TcpStream>) -> Option<u16> {
    let code = timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => {}
                other => panic!("socket ended without a close frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for close");
    drain(ws).await;
    code
}

/// Close from the server side with `code`.
async fn close_with(ws: &mut WebSocketStream<TcpStream>, code: u16) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: "".into(),
    };
    let _ = ws.close(Some(frame)).await;
    drain(ws).await;
}

async fn drain(ws: &mut WebSocketStream<TcpStream>) {
    let _ = timeout(WAIT, async { while let Some(Ok(_)) = ws.next().await {} }).await;
}

// ============================================================================
// Test Helpers - Client
// ============================================================================

fn test_config() -> GatewayConfig {
    GatewayConfig::new("http://127.0.0.1:1").with_token("Bot secret")
}

fn client(
    gateway: &MockGateway,
    config: &GatewayConfig,
) -> (GatewayClient<StaticGateway>, mpsc::UnboundedReceiver<GatewayEvent>) {
    GatewayClient::new(config, StaticGateway::new(gateway.url()))
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<GatewayEvent>,
    matches: impl Fn(&GatewayEvent) -> bool,
) -> GatewayEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ============================================================================
// Handshake Tests
// ============================================================================

#[tokio::test]
async fn test_fresh_connect_identifies_and_becomes_ready() {
    let gateway = MockGateway::new().await;
    let (mut client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();

    let server = tokio::spawn(async move {
        let mut ws = gateway.accept().await;
        let identify = hello(&mut ws, 45_000).await;
        send_frame(
            &mut ws,
            &Frame::dispatch(READY, 1, json!({ "session_id": "abc123" })),
        )
        .await;
        let heartbeat = recv_op(&mut ws, OpCode::Heartbeat).await;
        (identify, heartbeat, ws)
    });

    timeout(WAIT, client.connect())
        .await
        .expect("connect timed out")
        .expect("connect failed");
    assert_eq!(client.status(), ConnectionStatus::Ready);
    assert_eq!(handle.status(), ConnectionStatus::Ready);

    let (identify, heartbeat, _ws) = server.await.expect("server task panicked");
    assert_eq!(identify.op, OpCode::Identify);
    assert_eq!(identify.d["token"], "secret");
    assert_eq!(identify.d["properties"]["library"], "gatelink");
    assert_eq!(heartbeat.d, json!(1));

    let event = wait_for(&mut events, |e| matches!(e, GatewayEvent::Ready { .. })).await;
    assert!(matches!(event, GatewayEvent::Ready { session_id, .. } if session_id == "abc123"));
}

#[tokio::test]
async fn test_missing_token_stalls_after_hello() {
    let gateway = MockGateway::new().await;
    let config = GatewayConfig::new("http://127.0.0.1:1");
    let (mut client, _events) = client(&gateway, &config);

    let server = tokio::spawn(async move {
        let mut ws = gateway.accept().await;
        send_frame(&mut ws, &Frame::hello(45_000)).await;
        let silent = timeout(Duration::from_millis(500), ws.next()).await.is_err();
        (silent, ws)
    });

    let result = timeout(Duration::from_millis(800), client.connect()).await;
    assert!(result.is_err(), "connect should not settle without a token");
    assert_eq!(client.status(), ConnectionStatus::Nearly);
    let (silent, _ws) = server.await.unwrap();
    assert!(silent, "client must not send anything");
}

#[tokio::test]
async fn test_connect_fails_when_closed_during_handshake() {
    let gateway = MockGateway::new().await;
    let (mut client, _events) = client(&gateway, &test_config());

    let server = tokio::spawn(async move {
        let mut ws = gateway.accept().await;
        hello(&mut ws, 45_000).await;
        close_with(&mut ws, 4004).await;
    });

    let result = timeout(WAIT, client.connect()).await.expect("connect timed out");
    assert!(matches!(result, Err(GatewayError::Closed(close)) if close.code == 4004));
    server.await.unwrap();
}

// ============================================================================
// Heartbeat Tests
// ============================================================================

#[tokio::test]
async fn test_heartbeat_request_is_answered_and_ack_measures_latency() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 45_000).await;
    send_frame(
        &mut ws,
        &Frame::dispatch(READY, 1, json!({ "session_id": "abc123" })),
    )
    .await;
    recv_op(&mut ws, OpCode::Heartbeat).await;

    // outstanding ack, but a request must still be answered
    send_frame(&mut ws, &Frame::new(OpCode::Heartbeat, json!(null))).await;
    let reply = recv_op(&mut ws, OpCode::Heartbeat).await;
    assert_eq!(reply.d, json!(1));

    send_frame(&mut ws, &Frame::heartbeat_ack()).await;
    timeout(WAIT, async {
        while handle.ping().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("latency never measured");

    handle.shutdown().unwrap();
    assert_eq!(recv_close(&mut ws).await, Some(1000));
    wait_for(&mut events, |e| matches!(e, GatewayEvent::Disconnected(_))).await;
    assert!(driver.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unread_event_channel_does_not_stall_heartbeats() {
    let gateway = MockGateway::new().await;
    // held but never read
    let (client, _events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 45_000).await;
    send_frame(
        &mut ws,
        &Frame::dispatch(READY, 1, json!({ "session_id": "abc123" })),
    )
    .await;
    recv_op(&mut ws, OpCode::Heartbeat).await;

    for seq in 2..=401 {
        send_frame(&mut ws, &Frame::dispatch("IMAGE_CREATE", seq, json!({ "n": seq }))).await;
    }
    send_frame(&mut ws, &Frame::new(OpCode::Heartbeat, json!(null))).await;
    let reply = recv_op(&mut ws, OpCode::Heartbeat).await;
    assert_eq!(reply.d, json!(401));

    handle.shutdown().unwrap();
    assert_eq!(recv_close(&mut ws).await, Some(1000));
    assert!(timeout(WAIT, driver).await.expect("run did not stop").unwrap().is_ok());
}

#[tokio::test]
async fn test_unacked_heartbeat_closes_zombie_and_identifies_again() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 200).await;
    send_frame(
        &mut ws,
        &Frame::dispatch(READY, 1, json!({ "session_id": "abc123" })),
    )
    .await;

    // never acknowledge; the next beat finds the previous one outstanding
    assert_eq!(recv_close(&mut ws).await, Some(4009));
    wait_for(&mut events, |e| {
        matches!(e, GatewayEvent::Error(GatewayError::ZombieConnection))
    })
    .await;

    let mut ws = gateway.accept().await;
    let handshake = hello(&mut ws, 45_000).await;
    assert_eq!(handshake.op, OpCode::Identify);

    handle.shutdown().unwrap();
    recv_close(&mut ws).await;
    assert!(driver.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_zero_interval_hello_closes_and_reconnects() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    send_frame(&mut ws, &Frame::hello(0)).await;
    assert_eq!(recv_close(&mut ws).await, Some(4009));
    wait_for(&mut events, |e| {
        matches!(e, GatewayEvent::Error(GatewayError::Protocol(_)))
    })
    .await;

    let mut ws = gateway.accept().await;
    let handshake = hello(&mut ws, 45_000).await;
    assert_eq!(handshake.op, OpCode::Identify);

    handle.shutdown().unwrap();
    recv_close(&mut ws).await;
    assert!(driver.await.unwrap().is_ok());
}

// ============================================================================
// Close Policy Tests
// ============================================================================

#[tokio::test]
async fn test_terminal_close_stops_client() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 45_000).await;
    close_with(&mut ws, 4004).await;

    let result = timeout(WAIT, driver).await.expect("run did not stop").unwrap();
    assert!(matches!(result, Err(GatewayError::TerminalClose(close)) if close.code == 4004));

    let event = wait_for(&mut events, |e| matches!(e, GatewayEvent::Disconnected(_))).await;
    assert!(matches!(event, GatewayEvent::Disconnected(close) if close.code == 4004));

    // nothing reconnects
    assert!(
        timeout(Duration::from_millis(1500), gateway.listener.accept())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_session_timeout_close_forces_fresh_identify() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 45_000).await;
    send_frame(
        &mut ws,
        &Frame::dispatch(READY, 1, json!({ "session_id": "abc123" })),
    )
    .await;
    send_frame(&mut ws, &Frame::dispatch("GUILD_UPDATE", 2, json!({}))).await;
    close_with(&mut ws, 4009).await;

    let event = wait_for(&mut events, |e| matches!(e, GatewayEvent::Reconnecting { .. })).await;
    assert!(matches!(event, GatewayEvent::Reconnecting { delay } if delay == Duration::from_millis(1000)));

    let mut ws = gateway.accept().await;
    let handshake = hello(&mut ws, 45_000).await;
    assert_eq!(handshake.op, OpCode::Identify);

    handle.shutdown().unwrap();
    recv_close(&mut ws).await;
    assert!(driver.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_clean_server_close_resumes_session() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 45_000).await;
    send_frame(
        &mut ws,
        &Frame::dispatch(READY, 1, json!({ "session_id": "abc123" })),
    )
    .await;
    send_frame(
        &mut ws,
        &Frame::dispatch("IMAGE_CREATE", 5, json!({ "id": "img" })),
    )
    .await;
    let dispatch = wait_for(&mut events, |e| matches!(e, GatewayEvent::Dispatch { .. })).await;
    assert_eq!(
        dispatch,
        GatewayEvent::Dispatch {
            event: "IMAGE_CREATE".to_string(),
            data: json!({ "id": "img" }),
            sequence: Some(5),
        }
    );
    close_with(&mut ws, 1000).await;

    let mut ws = gateway.accept().await;
    let resume = hello(&mut ws, 45_000).await;
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(
        resume.d,
        json!({ "token": "secret", "session_id": "abc123", "seq": 5 })
    );

    send_frame(&mut ws, &Frame::dispatch(RESUMED, 7, json!(null))).await;
    let event = wait_for(&mut events, |e| matches!(e, GatewayEvent::Resumed { .. })).await;
    assert_eq!(event, GatewayEvent::Resumed { replayed: Some(2) });

    handle.shutdown().unwrap();
    recv_close(&mut ws).await;
    assert!(driver.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_shutdown_while_waiting_to_reconnect() {
    let gateway = MockGateway::new().await;
    let (client, mut events) = client(&gateway, &test_config());
    let handle = client.handle();
    let driver = tokio::spawn(client.run());

    let mut ws = gateway.accept().await;
    hello(&mut ws, 45_000).await;
    close_with(&mut ws, 4000).await;
    wait_for(&mut events, |e| matches!(e, GatewayEvent::Reconnecting { .. })).await;

    handle.shutdown().unwrap();
    let result = timeout(WAIT, driver).await.expect("run did not stop").unwrap();
    assert!(result.is_ok());
    let event = wait_for(&mut events, |e| matches!(e, GatewayEvent::Disconnected(_))).await;
    assert!(matches!(event, GatewayEvent::Disconnected(close) if close.code == 1000));
}

// ============================================================================
// Discovery Failure Tests
// ============================================================================

#[tokio::test]
async fn test_unreachable_api_gives_up_after_max_attempts() {
    let mut config = test_config();
    config.reconnect.initial_delay_ms = 10;
    config.reconnect.max_attempts = Some(2);
    let discovery = HttpDiscovery::new(
        "http://127.0.0.1:1",
        1,
        config.token.clone(),
        Duration::from_secs(1),
    )
    .unwrap();
    let (client, mut events) = GatewayClient::new(&config, discovery);

    let result = timeout(WAIT, client.run()).await.expect("run did not stop");
    assert!(matches!(result, Err(GatewayError::Connectivity(_))));

    let event = wait_for(&mut events, |e| matches!(e, GatewayEvent::Reconnecting { .. })).await;
    assert!(matches!(event, GatewayEvent::Reconnecting { delay } if delay == Duration::from_millis(10)));
}
