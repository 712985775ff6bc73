//! Binary payload codec.
//!
//! The schema structs live in `microcloud-core`; this module fixes the wire
//! encoding so every service agrees on it.

use microcloud_core::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Encode a payload for the bus
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| Error::codec(format!("encode: {e}")))
}

/// Decode a payload received from the bus
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| Error::codec(format!("decode: {e}")))
}
