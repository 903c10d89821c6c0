//! JSON codec for MQTT payloads
//!
//! Every message on the wire is a single JSON object; MQTT preserves message
//! boundaries, so no framing is needed. Decoding is strict enough to reject
//! garbage but tolerant of absent optional fields — a command without a
//! `cmd_id` still decodes, so the controller can acknowledge it as invalid
//! instead of dropping it.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::{Ack, Command, StateSnapshot, Status, Telemetry};

/// Maximum outbound payload size (1 MB) to prevent runaway padding
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload too large: {0} bytes (max: {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message into a JSON byte buffer
pub fn encode<T: Serialize>(msg: &T) -> Result<Bytes, CodecError> {
    let buf = serde_json::to_vec(msg)?;
    if buf.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(buf.len()));
    }
    Ok(Bytes::from(buf))
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Decode an inbound command payload
pub fn decode_command(payload: &[u8]) -> Result<Command, CodecError> {
    decode(payload)
}

/// Decode an inbound acknowledgment payload
pub fn decode_ack(payload: &[u8]) -> Result<Ack, CodecError> {
    decode(payload)
}

/// Decode an inbound state snapshot payload
pub fn decode_state(payload: &[u8]) -> Result<StateSnapshot, CodecError> {
    decode(payload)
}

/// Decode an inbound status payload
pub fn decode_status(payload: &[u8]) -> Result<Status, CodecError> {
    decode(payload)
}

/// Decode an inbound telemetry payload
pub fn decode_telemetry(payload: &[u8]) -> Result<Telemetry, CodecError> {
    decode(payload)
}
