//! Typed payloads for the handshake frames.

use serde::{Deserialize, Serialize};

use crate::intents::{self, Intents};

/// Dispatch event sent once a fresh IDENTIFY succeeds.
pub const READY: &str = "READY";
/// Dispatch event sent once a RESUME succeeds.
pub const RESUMED: &str = "RESUMED";

/// HELLO payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat cadence in milliseconds.
    pub heartbeat_interval: u64,
}

/// Client metadata sent with IDENTIFY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperties {
    /// Operating system.
    pub os: String,
    /// Library name.
    pub library: String,
    /// Library version.
    pub version: String,
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            library: "gatelink".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// IDENTIFY payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Credential token.
    pub token: String,
    /// Capability bitmask.
    #[serde(with = "intents::bits")]
    pub intents: Intents,
    /// Shard index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
    /// Client metadata.
    pub properties: ClientProperties,
}

/// RESUME payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Credential token.
    pub token: String,
    /// Session being resumed.
    pub session_id: String,
    /// Last sequence seen before the socket closed.
    pub seq: i64,
}

/// The part of the READY payload the connection itself needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Server-assigned session id.
    pub session_id: String,
}
