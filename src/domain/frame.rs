//! Inbound frame decoding.
//!
//! Each inbound text unit is either a heartbeat reply or a JSON object with
//! a `type` string and a `data` field. Heartbeat replies come in two shapes:
//! the bare marker (`pong` / `ping`) and the JSON object
//! `{"type": "pong"}` the backend answers probes with. Neither reaches
//! subscribers.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use super::Event;
use crate::error::ClientError;

/// Probe frame sent by the heartbeat monitor.
pub const PING_FRAME: &str = "ping";

/// Heartbeat reply marker.
pub const PONG_FRAME: &str = "pong";

/// One classified inbound unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Heartbeat reply; intercepted by the manager.
    Heartbeat,
    /// Application event for the dispatcher.
    Event(Event),
}

/// Raw wire object before classification.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    event_type: String,
    /// `None` only when the field is absent; `"data": null` is `Some(Null)`.
    #[serde(default, deserialize_with = "present")]
    data: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl Frame {
    /// Decodes one inbound text unit.
    ///
    /// A frame without a `data` field carries its remaining fields as the
    /// payload object (the backend's welcome frame uses `message`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MalformedFrame`] if the text is not a JSON
    /// object with a string `type`.
    pub fn decode(raw: &str) -> Result<Self, ClientError> {
        let trimmed = raw.trim();
        if is_heartbeat_marker(trimmed) {
            return Ok(Self::Heartbeat);
        }

        let wire: WireFrame = serde_json::from_str(trimmed)?;
        if is_heartbeat_marker(&wire.event_type) {
            return Ok(Self::Heartbeat);
        }
        if wire.event_type.is_empty() {
            return Err(ClientError::MalformedFrame("empty event type".to_string()));
        }

        let payload = match wire.data {
            Some(data) => data,
            None if wire.rest.is_empty() => Value::Null,
            None => Value::Object(wire.rest),
        };
        Ok(Self::Event(Event::new(wire.event_type, payload)))
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn is_heartbeat_marker(s: &str) -> bool {
    s == PONG_FRAME || s == PING_FRAME
}
