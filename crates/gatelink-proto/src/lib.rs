//! # gatelink-proto
//!
//! Wire protocol definitions for the gatelink event gateway.
//!
//! Every frame on the socket has the shape `{ op, d, s, t }`: an opcode,
//! an opcode-specific payload, the dispatch sequence number and the
//! dispatch event name.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod close;
pub mod error;
pub mod frame;
pub mod intents;
pub mod payloads;

pub use close::CloseEvent;
pub use error::ProtoError;
pub use frame::{Frame, OpCode, NO_SEQUENCE};
pub use intents::Intents;
pub use payloads::{
    ClientProperties, HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload, READY, RESUMED,
};
