//! Envelope Module
//!
//! Inbound envelopes as delivered by the client adapter, and the telemetry
//! record decoded from their payload.
//!
//! # Payload Format
//!
//! Envelopes on the bridge channel carry UTF-8 JSON:
//!
//! ```json
//! {
//!   "device": "sensor1",
//!   "measurements": { "temp": 21.5, "open": false },
//!   "timestamp": "2023-01-01T00:00:00Z"
//! }
//! ```
//!
//! `device` and `measurements` are required, `timestamp` is optional and
//! unknown fields are ignored.

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;


/// Measurement name to value mapping
pub type Measurements = serde_json::Map<String, serde_json::Value>;

/// Transport data needed to acknowledge an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryTag {
    /// Packet identifier assigned by the transport (0 when not applicable)
    pub packet_id: u16,
    /// Whether the transport expects an acknowledgement for this delivery
    pub requires_ack: bool,
}

impl DeliveryTag {
    /// Tag for a delivery that owes an acknowledgement
    pub fn acked(packet_id: u16) -> Self {
        Self {
            packet_id,
            requires_ack: true,
        }
    }

    /// Tag for a fire-and-forget delivery
    pub fn unacked() -> Self {
        Self::default()
    }
}

/// A message received on a named input channel
#[derive(Debug, Clone)]
pub struct InputEnvelope {
    /// Input channel the message arrived on
    pub channel: String,
    /// Raw message body
    pub payload: Bytes,
    /// Delivery information for acknowledgement
    pub delivery: DeliveryTag,
}

impl InputEnvelope {
    /// Create a new envelope
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>, delivery: DeliveryTag) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            delivery,
        }
    }

    /// Decode the payload as a telemetry request
    pub fn decode(&self) -> Result<TelemetryRequest, DecodeError> {
        TelemetryRequest::from_slice(&self.payload)
    }
}

/// Decoded telemetry for a single device
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryRequest {
    /// Device identifier
    #[serde(rename = "device")]
    pub device_id: String,
    /// Measurement values keyed by name
    pub measurements: Measurements,
    /// Optional ISO-8601 timestamp, passed through untouched
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl TelemetryRequest {
    /// Decode a telemetry request from raw payload bytes
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::Empty);
        }
        let text = std::str::from_utf8(payload).map_err(DecodeError::Utf8)?;
        serde_json::from_str(text).map_err(DecodeError::Json)
    }
}

/// Payload decoding errors
#[derive(Debug)]
pub enum DecodeError {
    /// Payload has no bytes
    Empty,
    /// Payload is not valid UTF-8
    Utf8(std::str::Utf8Error),
    /// Payload is not a valid telemetry record
    Json(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "Empty payload"),
            DecodeError::Utf8(e) => write!(f, "Payload is not UTF-8: {}", e),
            DecodeError::Json(e) => write!(f, "Invalid telemetry record: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Empty => None,
            DecodeError::Utf8(e) => Some(e),
            DecodeError::Json(e) => Some(e),
        }
    }
}
