//! Gatelink - resilient client for a long-lived event gateway.
//!
//! Keeps one authenticated session alive across socket failures, server
//! resets and missed heartbeats, resuming it where possible.

pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;

pub use config::GatewayConfig;
pub use discovery::{GatewayDiscovery, HttpDiscovery, StaticGateway};
pub use error::GatewayError;
pub use gateway::{ConnectionStatus, GatewayClient, GatewayEvent, GatewayHandle};
pub use gatelink_proto as proto;
