//! Typed events decoded from the stream.
//!
//! An [`Event`] is the unit the dispatcher fans out: a type identifier plus
//! an opaque JSON payload. It serializes back to the wire shape
//! (`{"type": ..., "data": ...}`) so the notification surface can forward it
//! unchanged.

use serde::{Deserialize, Serialize};

/// New alert raised by the backend.
pub const ALERT_NEW: &str = "alert.new";

/// Video processing worker changed status.
pub const PROCESS_STATUS_CHANGED: &str = "process.status_changed";

/// Camera changed status.
pub const CAMERA_STATUS_CHANGED: &str = "camera.status_changed";

/// Pseudo-event emitted by the manager when a connection opens. The backend
/// also sends a welcome frame with this type.
pub const CONNECTED: &str = "connected";

/// Pseudo-event emitted by the manager when a connection is lost or closed.
pub const DISCONNECTED: &str = "disconnected";

/// Immutable event: type identifier and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "data", default)]
    payload: serde_json::Value,
}

impl Event {
    /// Creates an event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Returns the event type identifier (e.g. `"alert.new"`).
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the event payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
