//! In-process transport.
//!
//! Every successful [`Transport::open`] hands the remote end of the stream
//! to the owner of the [`MemoryTransport`] as a [`MemoryPeer`], which can
//! push frames to the client, read what the client sent, and close the
//! stream. Opens can be refused to simulate an unreachable backend or held
//! to simulate a slow one, and every attempt is recorded with its (tokio)
//! timestamp.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{
    CloseReason, DuplexStream, FrameSender, INBOUND_CAPACITY, OutboundCommand, Transport,
    TransportEvent,
};
use crate::error::ClientError;

/// One recorded call to [`Transport::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAttempt {
    /// Requested address.
    pub address: String,
    /// When the attempt was made.
    pub at: Instant,
    /// Whether the attempt was refused.
    pub refused: bool,
}

/// Cloneable in-process transport; clones share peers and history.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    refuse: AtomicBool,
    held: watch::Sender<bool>,
    attempts: Mutex<Vec<OpenAttempt>>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

impl MemoryTransport {
    /// Creates a transport that accepts every open.
    #[must_use]
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                refuse: AtomicBool::new(false),
                held: watch::Sender::new(false),
                attempts: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Makes subsequent opens fail (`true`) or succeed (`false`).
    pub fn set_refusing(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Holds accepted opens (`true`) until released (`false`).
    ///
    /// A held open has already handed its [`MemoryPeer`] out; the client
    /// side of the stream is returned only on release. If the client gives
    /// up on the open meanwhile, the peer observes the stream closing.
    pub fn hold_opens(&self, hold: bool) {
        self.shared.held.send_replace(hold);
    }

    /// Returns every open attempt so far, oldest first.
    #[must_use]
    pub fn attempts(&self) -> Vec<OpenAttempt> {
        self.shared
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of open attempts so far.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.shared
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Waits for the next successfully opened stream.
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.shared.peers_rx.lock().await.recv().await
    }

    /// Returns the next opened stream if one is already waiting.
    pub async fn try_accept(&self) -> Option<MemoryPeer> {
        self.shared.peers_rx.lock().await.try_recv().ok()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    async fn open(&self, address: &str) -> Result<DuplexStream, ClientError> {
        let refused = self.shared.refuse.load(Ordering::SeqCst);
        self.shared
            .attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(OpenAttempt {
                address: address.to_string(),
                at: Instant::now(),
                refused,
            });

        if refused {
            return Err(ClientError::ConnectFailed {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (sender, outbound) = FrameSender::channel();
        let (events_tx, events) = mpsc::channel(INBOUND_CAPACITY);
        let peer = MemoryPeer {
            address: address.to_string(),
            events: Some(events_tx),
            outbound,
            client_closed: false,
        };
        self.shared
            .peers_tx
            .send(peer)
            .map_err(|_| ClientError::ConnectFailed {
                address: address.to_string(),
                reason: "transport dropped".to_string(),
            })?;

        let mut held = self.shared.held.subscribe();
        if held.wait_for(|h| !*h).await.is_err() {
            return Err(ClientError::ConnectFailed {
                address: address.to_string(),
                reason: "transport dropped".to_string(),
            });
        }
        Ok(DuplexStream { sender, events })
    }
}

/// Remote end of one in-process stream.
///
/// Dropping a peer without [`MemoryPeer::close`] ends the client's receiver
/// without a close notification.
#[derive(Debug)]
pub struct MemoryPeer {
    address: String,
    events: Option<mpsc::Sender<TransportEvent>>,
    outbound: mpsc::UnboundedReceiver<OutboundCommand>,
    client_closed: bool,
}

impl MemoryPeer {
    /// Address the client opened.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Pushes one text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] once the stream is closed or
    /// the client stopped reading.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let Some(events) = &self.events else {
            return Err(ClientError::NotConnected);
        };
        events
            .send(TransportEvent::Frame(text.into()))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Closes the stream from the remote side. Only the first call notifies
    /// the client.
    pub async fn close(&mut self, reason: Option<CloseReason>) {
        if let Some(events) = self.events.take() {
            let _ = events.send(TransportEvent::Closed(reason)).await;
        }
    }

    /// Waits for the next frame the client sent. Returns `None` once the
    /// client closed the stream.
    pub async fn recv(&mut self) -> Option<String> {
        match self.outbound.recv().await {
            Some(OutboundCommand::Frame(text)) => Some(text),
            Some(OutboundCommand::Close) | None => {
                self.client_closed = true;
                None
            }
        }
    }

    /// Returns every frame the client sent that has not been read yet,
    /// without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        loop {
            match self.outbound.try_recv() {
                Ok(OutboundCommand::Frame(text)) => frames.push(text),
                Ok(OutboundCommand::Close) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.client_closed = true;
                    break;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
            }
        }
        frames
    }

    /// Returns `true` once the client asked to close or dropped its sender.
    #[must_use]
    pub fn client_closed(&self) -> bool {
        self.client_closed
    }
}
