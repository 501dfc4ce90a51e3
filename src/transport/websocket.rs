//! WebSocket transport built on `tokio-tungstenite`.
//!
//! Each opened stream gets one pump task that owns the socket: it writes
//! queued [`OutboundCommand`]s and forwards inbound text (and UTF-8 binary)
//! messages as [`TransportEvent::Frame`]. When the socket ends for any
//! reason the pump emits a single [`TransportEvent::Closed`] and exits.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{
    CloseReason, DuplexStream, FrameSender, INBOUND_CAPACITY, OutboundCommand, Transport,
    TransportEvent,
};
use crate::error::ClientError;

/// Opens `ws://` (and with the `tls` feature, `wss://`) streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    async fn open(&self, address: &str) -> Result<DuplexStream, ClientError> {
        let (socket, _response) =
            connect_async(address)
                .await
                .map_err(|e| ClientError::ConnectFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        let (sender, outbound) = FrameSender::channel();
        let (events_tx, events) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(pump(socket, outbound, events_tx));

        tracing::debug!(address, "websocket opened");
        Ok(DuplexStream { sender, events })
    }
}

/// Runs the read/write loop for one socket until it closes.
async fn pump(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<OutboundCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let reason = loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(OutboundCommand::Frame(text)) => {
                        if let Err(e) = ws_tx.send(Message::text(text)).await {
                            break Some(CloseReason::new(None, e.to_string()));
                        }
                    }
                    Some(OutboundCommand::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break Some(CloseReason::new(Some(1000), "closed by client"));
                    }
                }
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| {
                            CloseReason::new(Some(u16::from(f.code)), f.reason.as_str())
                        });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some(CloseReason::new(None, e.to_string())),
                    None => break None,
                };
                if events.send(TransportEvent::Frame(text)).await.is_err() {
                    // Nobody is listening any more.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                }
            }
        }
    };

    tracing::debug!(reason = ?reason, "websocket closed");
    let _ = events.send(TransportEvent::Closed(reason)).await;
}
