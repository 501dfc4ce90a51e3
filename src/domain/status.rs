//! Connection health snapshot for the status surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ConnectionState;

/// Point-in-time view of a manager's connection health.
///
/// Published on a `watch` channel on every state change; the IPC layer
/// either polls it or awaits changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Configured connection target.
    pub address: String,
    /// Identifier of the open connection, assigned per successful open.
    pub connection_id: Option<Uuid>,
    /// When the current connection opened.
    pub connected_since: Option<DateTime<Utc>>,
    /// Reconnect attempts scheduled since the last successful open.
    pub reconnect_attempts: u32,
    /// Reason reported for the most recent closure, if any.
    pub last_close_reason: Option<String>,
    /// Code of the most recent [`crate::error::ClientError`], if any.
    pub last_error_code: Option<u32>,
}

impl ConnectionStatus {
    /// Initial status for a manager targeting `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            address: address.into(),
            connection_id: None,
            connected_since: None,
            reconnect_attempts: 0,
            last_close_reason: None,
            last_error_code: None,
        }
    }

    /// Returns `true` iff the state is [`ConnectionState::Connected`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
