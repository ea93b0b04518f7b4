//! Gateway URL discovery.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::GatewayError;

/// User agent sent with discovery requests.
pub const DEFAULT_USER_AGENT: &str = concat!("gatelink/", env!("CARGO_PKG_VERSION"));

/// Source of the gateway socket URL.
pub trait GatewayDiscovery: Send {
    /// Look up the base URL of the gateway.
    fn gateway_url(&self) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

/// A fixed gateway URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticGateway(pub String);

impl StaticGateway {
    /// Always resolve to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }
}

impl GatewayDiscovery for StaticGateway {
    async fn gateway_url(&self) -> Result<String, GatewayError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct GatewayInfo {
    url: String,
}

/// Discovers the gateway through the REST API.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    client: reqwest::Client,
    api_url: String,
    version: u8,
    token: Option<String>,
}

impl HttpDiscovery {
    /// Create a discovery client for `api_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_url: impl Into<String>,
        version: u8,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            version,
            token,
        })
    }

    /// The discovery endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/v{}/gateway", self.api_url.trim_end_matches('/'), self.version)
    }
}

impl GatewayDiscovery for HttpDiscovery {
    async fn gateway_url(&self) -> Result<String, GatewayError> {
        let token = self.token.as_deref().ok_or(GatewayError::MissingCredential)?;
        let endpoint = self.endpoint();
        debug!(%endpoint, "fetching gateway information");

        let response = self
            .client
            .get(&endpoint)
            .header(AUTHORIZATION, format!("Bot {token}"))
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .send()
            .await
            .map_err(|e| GatewayError::Connectivity(format!("gateway lookup failed: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(GatewayError::InvalidCredential),
            status if !status.is_success() => {
                return Err(GatewayError::Connectivity(format!(
                    "gateway lookup returned status {status}"
                )));
            }
            _ => {}
        }

        let info: GatewayInfo = response
            .json()
            .await
            .map_err(|e| GatewayError::Connectivity(format!("invalid gateway information: {e}")))?;
        debug!(url = %info.url, "fetched gateway information");
        Ok(info.url)
    }
}

/// Socket URL for a discovered gateway: trailing `/` and `?v=<version>`.
///
/// # Errors
///
/// Returns an error if `base` is not a valid URL.
pub fn socket_url(base: &str, version: u8) -> Result<Url, GatewayError> {
    let mut url = Url::parse(base)
        .map_err(|e| GatewayError::Config(format!("invalid gateway url {base:?}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.query_pairs_mut()
        .clear()
        .append_pair("v", &version.to_string());
    Ok(url)
}
