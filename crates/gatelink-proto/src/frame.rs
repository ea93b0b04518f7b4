//! Gateway frame envelope and opcodes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ProtoError;
use crate::payloads::{IdentifyPayload, ResumePayload};

/// Sequence value meaning "no dispatch seen yet".
pub const NO_SEQUENCE: i64 = -1;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OpCode {
    /// Application event, tagged with `t` and sequenced with `s`.
    Dispatch = 0,
    /// Heartbeat in either direction; `a` marks an acknowledgment.
    Heartbeat = 1,
    /// Server greeting carrying the heartbeat cadence.
    Hello = 3,
    /// Start a new session.
    Identify = 4,
    /// Reattach to an existing session.
    Resume = 5,
}

impl TryFrom<u8> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            3 => Ok(Self::Hello),
            4 => Ok(Self::Identify),
            5 => Ok(Self::Resume),
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

/// A single gateway frame, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Opcode.
    pub op: OpCode,
    /// Opcode-specific payload.
    #[serde(default)]
    pub d: Value,
    /// Dispatch sequence number.
    #[serde(default)]
    pub s: Option<i64>,
    /// Dispatch event name.
    #[serde(default)]
    pub t: Option<String>,
    /// Heartbeat acknowledgment flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub a: bool,
}

impl Frame {
    /// Create a frame with the given opcode and payload.
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
            a: false,
        }
    }

    /// Heartbeat carrying the last seen sequence.
    #[must_use]
    pub fn heartbeat(sequence: i64) -> Self {
        Self::new(OpCode::Heartbeat, json!(sequence))
    }

    /// Heartbeat acknowledgment.
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self {
            a: true,
            ..Self::new(OpCode::Heartbeat, Value::Null)
        }
    }

    /// Server greeting.
    #[must_use]
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(
            OpCode::Hello,
            json!({ "heartbeat_interval": heartbeat_interval_ms }),
        )
    }

    /// Identify a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn identify(payload: &IdentifyPayload) -> Result<Self, ProtoError> {
        let d = serde_json::to_value(payload).map_err(|e| ProtoError::Encoding(e.to_string()))?;
        Ok(Self::new(OpCode::Identify, d))
    }

    /// Resume an existing session.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn resume(payload: &ResumePayload) -> Result<Self, ProtoError> {
        let d = serde_json::to_value(payload).map_err(|e| ProtoError::Encoding(e.to_string()))?;
        Ok(Self::new(OpCode::Resume, d))
    }

    /// Dispatch frame for the named event.
    #[must_use]
    pub fn dispatch(event: impl Into<String>, sequence: i64, d: Value) -> Self {
        Self {
            s: Some(sequence),
            t: Some(event.into()),
            ..Self::new(OpCode::Dispatch, d)
        }
    }

    /// Event name of a dispatch frame.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        self.t.as_deref()
    }

    /// Decode the payload into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::InvalidPayload`] if `d` does not match `T`.
    pub fn payload<T: DeserializeOwned>(&self, kind: &'static str) -> Result<T, ProtoError> {
        T::deserialize(&self.d).map_err(|e| ProtoError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}
