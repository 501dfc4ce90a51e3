//! Broadcast of delivered events to out-of-process consumers.
//!
//! The connection manager publishes every event it delivered (its own
//! `connected` / `disconnected` pseudo-events included) after in-process
//! subscribers ran. A forwarder, such as an IPC bridge, takes one
//! [`EventReceiver`] and relays events unchanged.
//!
//! The ring buffer is bounded. A receiver that falls behind loses the oldest
//! events; [`EventReceiver`] skips past the gap, logs it and keeps a running
//! count instead of surfacing the lag as an error.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::Event;

/// Publishing side of the bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a bus holding up to `capacity` undelivered events per
    /// receiver. Zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event` and returns how many receivers will see it.
    /// Without receivers the event is dropped.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns a receiver for every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.sender.subscribe(),
            skipped: 0,
        }
    }
}

/// Consuming side of the bus.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<Event>,
    skipped: u64,
}

impl EventReceiver {
    /// Waits for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.record_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events this receiver lost to buffer overflow so far.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    fn record_lag(&mut self, n: u64) {
        self.skipped = self.skipped.saturating_add(n);
        tracing::warn!(
            skipped = n,
            total_skipped = self.skipped,
            "event receiver lagged; oldest events dropped"
        );
    }
}
