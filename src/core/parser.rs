//! Frame codec for realtime WebSocket messages
//!
//! Decoding never fails loudly: a frame that is not a JSON object with a
//! string `type` is logged and dropped.

use super::InboundEvent;
use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{trace, warn};

/// Parse one inbound text frame
///
/// Returns None if the frame is not a valid event envelope.
pub fn parse_frame(msg: &str) -> Option<InboundEvent> {
    trace!(len = msg.len(), "Parsing frame");

    // Decode as an object first: derived Deserialize also accepts a
    // positional array for the same struct.
    serde_json::from_str::<Map<String, Value>>(msg)
        .and_then(|envelope| serde_json::from_value::<InboundEvent>(envelope.into()))
        .map_err(|e| {
            warn!(error = %e, len = msg.len(), "Dropping undecodable frame");
        })
        .ok()
}

/// Serialize an outbound frame to JSON text
pub fn encode_frame<T: Serialize + ?Sized>(frame: &T) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}
