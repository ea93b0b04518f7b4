//! Error types for the gatelink-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding gateway frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Opcode not part of the protocol.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Frame payload did not match the shape its opcode requires.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Which payload failed.
        kind: &'static str,
        /// Underlying decoder message.
        reason: String,
    },
}
