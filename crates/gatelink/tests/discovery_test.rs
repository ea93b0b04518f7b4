//! Gateway discovery against a minimal HTTP server.

use std::time::Duration;

use gatelink::discovery::DEFAULT_USER_AGENT;
use gatelink::{GatewayDiscovery, GatewayError, HttpDiscovery};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one request with a canned response; yields the raw request text.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let task = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut request = String::new();
        while !request.contains("\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.push_str(&String::from_utf8_lossy(&buf[..n]));
        }

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        request
    });

    (url, task)
}

fn discovery(api_url: String, token: Option<&str>) -> HttpDiscovery {
    HttpDiscovery::new(api_url, 1, token.map(str::to_string), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_discovery_returns_gateway_url() {
    let (url, server) = serve_once("200 OK", r#"{"url":"wss://gateway.example.com"}"#).await;

    let gateway = discovery(url, Some("secret")).gateway_url().await.unwrap();
    assert_eq!(gateway, "wss://gateway.example.com");

    let request = server.await.unwrap().to_lowercase();
    assert!(request.starts_with("get /v1/gateway http/1.1"));
    assert!(request.contains("authorization: bot secret"));
    assert!(request.contains(&format!("user-agent: {}", DEFAULT_USER_AGENT.to_lowercase())));
}

#[tokio::test]
async fn test_discovery_unauthorized_is_invalid_credential() {
    let (url, server) = serve_once("401 Unauthorized", r#"{"message":"401: Unauthorized"}"#).await;

    let result = discovery(url, Some("bad")).gateway_url().await;
    assert_eq!(result, Err(GatewayError::InvalidCredential));
    server.await.unwrap();
}

#[tokio::test]
async fn test_discovery_server_error_is_connectivity() {
    let (url, server) = serve_once("500 Internal Server Error", "{}").await;

    let result = discovery(url, Some("secret")).gateway_url().await;
    assert!(matches!(result, Err(GatewayError::Connectivity(msg)) if msg.contains("500")));
    server.await.unwrap();
}

#[tokio::test]
async fn test_discovery_malformed_body_is_connectivity() {
    let (url, server) = serve_once("200 OK", r#"{"gateway":"nope"}"#).await;

    let result = discovery(url, Some("secret")).gateway_url().await;
    assert!(matches!(result, Err(GatewayError::Connectivity(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn test_discovery_refused_connection_is_connectivity() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = discovery(url, Some("secret")).gateway_url().await;
    assert!(matches!(result, Err(GatewayError::Connectivity(_))));
}
