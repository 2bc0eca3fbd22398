//! JSON codec helpers.
//!
//! Thin wrappers around `serde_json` for the wire encoding of [`Message`].
//! The wire format is self-describing JSON so any peer (federation hubs,
//! gateways, the flow editor) can read envelopes without Rust type metadata.

use semstreams_msg::Message;

use crate::error::BusError;

/// Encode a message to JSON bytes.
///
/// # Errors
///
/// Returns [`BusError::Codec`] if serialisation fails.
pub fn encode(message: &Message) -> Result<Vec<u8>, BusError> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode a message from JSON bytes.
///
/// # Errors
///
/// Returns [`BusError::Codec`] if deserialisation fails.
pub fn decode(bytes: &[u8]) -> Result<Message, BusError> {
    Ok(serde_json::from_slice(bytes)?)
}
