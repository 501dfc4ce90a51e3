//! Transport adapters: open a duplex text stream to an address.
//!
//! The connection manager only needs "open a connection to address A, get a
//! duplex stream, be told when it closes". A [`DuplexStream`] is a
//! [`FrameSender`] for outbound frames plus a receiver of
//! [`TransportEvent`]s. Every opened stream delivers exactly one
//! [`TransportEvent::Closed`], after which the receiver ends. A receiver
//! that ends without it is treated as a closure with no reason.
//!
//! Transports never retry on their own; all retry logic lives in
//! [`crate::client::ReconnectScheduler`].

pub mod memory;
pub mod websocket;

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;

use crate::error::ClientError;

pub use memory::{MemoryPeer, MemoryTransport};
pub use websocket::WebSocketTransport;

/// Buffered inbound events per stream before the transport applies
/// backpressure.
pub const INBOUND_CAPACITY: usize = 1_024;

/// Why a stream closed, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Protocol close code, when the transport has one.
    pub code: Option<u16>,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason.
    #[must_use]
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) if self.reason.is_empty() => write!(f, "close code {code}"),
            Some(code) => write!(f, "close code {code}: {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Inbound notification from an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text unit, not yet decoded.
    Frame(String),
    /// The stream closed. Fires exactly once per opened stream.
    Closed(Option<CloseReason>),
}

/// Outbound instruction consumed by a transport's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Send one text frame.
    Frame(String),
    /// Close the stream.
    Close,
}

/// Cloneable handle for writing to an open stream.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl FrameSender {
    /// Creates a sender and the receiver a transport writer drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SendFailed`] if the stream's writer is gone.
    pub fn send_text(&self, frame: impl Into<String>) -> Result<(), ClientError> {
        self.tx
            .send(OutboundCommand::Frame(frame.into()))
            .map_err(|_| ClientError::SendFailed("stream writer closed".to_string()))
    }

    /// Asks the transport to close the stream. No-op if already closed.
    pub fn close(&self) {
        let _ = self.tx.send(OutboundCommand::Close);
    }

    /// Returns `true` once the stream's writer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open bidirectional stream.
#[derive(Debug)]
pub struct DuplexStream {
    /// Outbound half.
    pub sender: FrameSender,
    /// Inbound frames followed by exactly one close notification.
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens duplex streams to an address.
pub trait Transport: Send + Sync + 'static {
    /// Opens a stream to `address`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectFailed`] if the stream cannot be
    /// established.
    fn open(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<DuplexStream, ClientError>> + Send;
}
