//! Capability bitmask sent with IDENTIFY.
//!
//! In human-readable formats (JSON config files) intents are written as flag
//! names, e.g. `"SHARDS | GUILDS"`. On the wire they travel as the raw
//! integer, see [`bits`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Event groups the client wants to receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Intents: u32 {
        /// Shard lifecycle and eval events.
        const SHARDS = 1 << 0;
        /// User updates.
        const USERS = 1 << 1;
        /// Guild updates.
        const GUILDS = 1 << 2;
        /// Moderation case events.
        const GUILD_CASES = 1 << 3;
        /// Member events.
        const GUILD_MEMBERS = 1 << 4;
        /// Image events.
        const IMAGES = 1 << 5;
        /// Internal service events.
        const INTERNAL = 1 << 6;
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::all()
    }
}

/// Serde adapter encoding [`Intents`] as its integer value.
pub mod bits {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Intents;

    /// Serialize as `u32`.
    pub fn serialize<S: Serializer>(intents: &Intents, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(intents.bits())
    }

    /// Deserialize from `u32`, dropping unknown bits.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Intents, D::Error> {
        u32::deserialize(deserializer).map(Intents::from_bits_truncate)
    }
}
