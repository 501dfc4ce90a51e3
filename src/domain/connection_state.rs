//! Connection lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`crate::client::ConnectionManager`].
///
/// Exactly one value per manager; mutated only by the manager, read by
/// callers through the status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and no pending attempt.
    #[default]
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// The stream is open and the heartbeat is running.
    Connected,
    /// The link was lost involuntarily; a retry is scheduled.
    Reconnecting,
}

impl ConnectionState {
    /// Returns the state as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Returns `true` while an open attempt is in flight or the link is up.
    ///
    /// `connect()` is a no-op in these states.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
