//! Client configuration.
//!
//! Loaded from a JSON file:
//! - REST endpoint used for gateway discovery
//! - Credentials, shard and intents sent in the handshake
//! - Handshake and request timeouts
//! - Backoff for connectivity failures

use std::path::Path;
use std::time::Duration;

use gatelink_proto::{ClientProperties, Intents};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::gateway::{Credentials, ReconnectConfig};

/// Regex for an auth scheme prefix on a token.
static TOKEN_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(bot|bearer)\s*").unwrap_or_else(|_| unreachable!()));

/// Strip a leading `Bot` or `Bearer` prefix from a token.
#[must_use]
pub fn normalize_token(token: &str) -> String {
    TOKEN_PREFIX.replace(token.trim_start(), "").trim().to_string()
}

/// Token with every segment after the second replaced by `*`, for logs.
#[must_use]
pub fn mask_token(token: &str) -> String {
    token
        .split('.')
        .enumerate()
        .map(|(i, segment)| {
            if i < 2 {
                segment.to_string()
            } else {
                "*".repeat(segment.chars().count())
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Backoff for failures to reach the gateway at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Ceiling for the retry delay in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor between retries.
    pub backoff_multiplier: f64,
    /// Give up after this many consecutive failures.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl From<&BackoffConfig> for ReconnectConfig {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_attempts: config.max_attempts,
        }
    }
}

const fn default_version() -> u8 {
    1
}

const fn default_hello_timeout() -> u64 {
    20
}

const fn default_rest_timeout() -> u64 {
    15
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Base URL of the REST API used for discovery.
    pub api_url: String,
    /// Protocol version.
    #[serde(default = "default_version")]
    pub version: u8,
    /// Token; a `Bot `/`Bearer ` prefix is stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shard index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
    /// Intent names, e.g. `"GUILDS | IMAGES"`.
    #[serde(default)]
    pub intents: Intents,
    /// Seconds to wait for HELLO after the socket opens.
    #[serde(default = "default_hello_timeout")]
    pub hello_timeout_secs: u64,
    /// Timeout for discovery requests in seconds.
    #[serde(default = "default_rest_timeout")]
    pub rest_timeout_secs: u64,
    /// Forward every inbound frame as a raw event.
    #[serde(default)]
    pub raw_frames: bool,
    /// Backoff for connectivity failures.
    #[serde(default)]
    pub reconnect: BackoffConfig,
}

impl GatewayConfig {
    /// Defaults for everything but the API URL.
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            version: default_version(),
            token: None,
            shard: None,
            intents: Intents::default(),
            hello_timeout_secs: default_hello_timeout(),
            rest_timeout_secs: default_rest_timeout(),
            raw_frames: false,
            reconnect: BackoffConfig::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref())?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, GatewayError> {
        let mut config: Self = serde_json::from_str(content)
            .map_err(|e| GatewayError::Config(format!("invalid JSON: {e}")))?;

        config.token = config.token.as_deref().map(normalize_token);
        config.validate()?;
        Ok(config)
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, GatewayError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| GatewayError::Config(format!("failed to serialize config: {e}")))
    }

    /// Replace the token, normalizing it.
    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(normalize_token(token));
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.api_url.is_empty() {
            return Err(GatewayError::Config("api_url cannot be empty".to_string()));
        }

        let url = url::Url::parse(&self.api_url)
            .map_err(|e| GatewayError::Config(format!("invalid api_url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GatewayError::Config(
                "api_url must start with http:// or https://".to_string(),
            ));
        }

        if self.version == 0 {
            return Err(GatewayError::Config(
                "version must be greater than 0".to_string(),
            ));
        }

        if self.hello_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "hello_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.rest_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "rest_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.token.as_deref().is_some_and(str::is_empty) {
            return Err(GatewayError::Config("token cannot be empty".to_string()));
        }

        if self.reconnect.backoff_multiplier < 1.0 {
            return Err(GatewayError::Config(
                "reconnect.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Handshake identity.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials {
            token: self.token.clone(),
            shard: self.shard,
            intents: self.intents,
            properties: ClientProperties::default(),
        }
    }

    /// Time allowed for HELLO.
    #[must_use]
    pub const fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    /// Time allowed for discovery requests.
    #[must_use]
    pub const fn rest_timeout(&self) -> Duration {
        Duration::from_secs(self.rest_timeout_secs)
    }

    /// Token as it may appear in logs.
    #[must_use]
    pub fn masked_token(&self) -> Option<String> {
        self.token.as_deref().map(mask_token)
    }
}
