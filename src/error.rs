//! Client error types with stable numeric codes.
//!
//! [`ClientError`] is the central error type for the event client. None of
//! these errors are fatal to the host process: the connection manager turns
//! every failure path into a well-defined state (Disconnected, or
//! Reconnecting with a scheduled retry) and reports the numeric code on the
//! status surface.
//!
//! # Error Code Ranges
//!
//! | Range     | Category      |
//! |-----------|---------------|
//! | 1000–1999 | Configuration |
//! | 2000–2999 | Connection    |
//! | 3000–3999 | Wire / frames |

/// Event client error enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Configuration value rejected by [`crate::config::ClientConfig::validate`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport could not open a connection to the address.
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Target address of the failed attempt.
        address: String,
        /// Transport-provided failure description.
        reason: String,
    },

    /// Operation requires an open connection.
    #[error("not connected")]
    NotConnected,

    /// A frame could not be handed to the transport.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// An inbound frame could not be decoded into an event.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The underlying transport reported an error mid-session.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidConfig(_) => 1001,
            Self::ConnectFailed { .. } => 2001,
            Self::NotConnected => 2002,
            Self::SendFailed(_) => 2003,
            Self::Transport(_) => 2004,
            Self::MalformedFrame(_) => 3001,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}
