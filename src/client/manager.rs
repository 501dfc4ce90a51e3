//! Connection manager: one state machine per event stream.
//!
//! [`ConnectionManager`] drives a [`Transport`] to open the stream, starts
//! the [`HeartbeatMonitor`] once open, routes inbound frames through the
//! [`EventDispatcher`], and on involuntary closure arms the
//! [`ReconnectScheduler`].
//!
//! # Concurrency
//!
//! All manager state sits behind one `tokio::sync::Mutex`, and every
//! transition happens while holding it. Spawned tasks (open attempt, reader,
//! heartbeat ticker, reconnect timer) hold only a `Weak` reference plus the
//! *epoch* they were started for. `connect()` and `disconnect()` bump the
//! epoch, so a task that wakes up for an older epoch does nothing.
//! `disconnect()` additionally aborts every task handle before it returns.
//!
//! The `connected` and `disconnected` pseudo-events are delivered while the
//! lock is held, together with the transition they announce. They therefore
//! strictly alternate, and `connected` precedes every frame of its
//! connection.
//!
//! Events are delivered at most once: frames in flight while the link drops
//! are lost, and nothing is replayed after a reconnect.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::heartbeat::HeartbeatMonitor;
use super::reconnect::{ReconnectPolicy, ReconnectScheduler};
use crate::config::ClientConfig;
use crate::dispatch::{EventDispatcher, Subscriber};
use crate::domain::event::{CONNECTED, DISCONNECTED};
use crate::domain::frame::PING_FRAME;
use crate::domain::{ConnectionState, ConnectionStatus, Event, EventBus, Frame};
use crate::error::ClientError;
use crate::transport::{CloseReason, DuplexStream, FrameSender, Transport, TransportEvent};

/// Close reason recorded for a caller-initiated disconnect.
const CLIENT_DISCONNECT: &str = "client disconnect";

/// Real-time event client for one address.
///
/// Cheap to clone; clones share the same connection. Dropping the last
/// clone cancels every timer and closes the link.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Transport> {
    config: ClientConfig,
    transport: Arc<T>,
    dispatcher: EventDispatcher,
    event_bus: EventBus,
    status_tx: watch::Sender<ConnectionStatus>,
    state: Mutex<ManagerState>,
}

#[derive(Debug)]
struct ManagerState {
    connection_state: ConnectionState,
    voluntary_close: bool,
    epoch: u64,
    link: Option<FrameSender>,
    opening: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectScheduler,
    connection_id: Option<Uuid>,
    connected_since: Option<DateTime<Utc>>,
    last_close_reason: Option<String>,
    last_error_code: Option<u32>,
}

impl ManagerState {
    fn abort_tasks(&mut self) {
        self.heartbeat.stop();
        self.reconnect.cancel();
        if let Some(task) = self.opening.take() {
            task.abort();
        }
        if let Some(task) = self.reader.take() {
            task.abort();
        }
    }
}

impl Drop for ManagerState {
    fn drop(&mut self) {
        self.abort_tasks();
        if let Some(link) = self.link.take() {
            link.close();
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a disconnected manager for `config.address`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self, ClientError> {
        config.validate()?;

        let (status_tx, _) = watch::channel(ConnectionStatus::new(config.address.clone()));
        let state = ManagerState {
            connection_state: ConnectionState::Disconnected,
            voluntary_close: false,
            epoch: 0,
            link: None,
            opening: None,
            reader: None,
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval()),
            reconnect: ReconnectScheduler::new(ReconnectPolicy::from_config(&config)),
            connection_id: None,
            connected_since: None,
            last_close_reason: None,
            last_error_code: None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                event_bus: EventBus::new(config.event_bus_capacity),
                dispatcher: EventDispatcher::new(),
                transport: Arc::new(transport),
                status_tx,
                state: Mutex::new(state),
                config,
            }),
        })
    }

    /// Starts connecting unless already Connecting or Connected.
    ///
    /// Returns once the attempt is started; the open itself runs in the
    /// background. From Disconnected the reconnect attempt count restarts.
    ///
    /// Success is reported by the `connected` pseudo-event and by
    /// [`ConnectionManager::is_connected`]. A failed open is handled like an
    /// involuntary closure.
    pub async fn connect(&self) {
        let mut st = self.inner.state.lock().await;
        if st.connection_state == ConnectionState::Disconnected {
            st.reconnect.reset();
        }
        self.inner.begin_connect(&mut st);
    }

    /// Closes the connection and cancels every timer. Safe from any state.
    ///
    /// When this returns no heartbeat probe and no reconnect attempt of the
    /// previous session can run any more.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        let mut st = inner.state.lock().await;
        st.voluntary_close = true;
        st.epoch = st.epoch.wrapping_add(1);
        st.abort_tasks();
        st.reconnect.reset();
        if let Some(link) = st.link.take() {
            link.close();
        }
        st.connection_id = None;
        st.connected_since = None;

        let previous = st.connection_state;
        if previous == ConnectionState::Disconnected {
            tracing::debug!("disconnect ignored; already disconnected");
            return;
        }

        st.last_close_reason = Some(CLIENT_DISCONNECT.to_string());
        inner.transition(&mut st, ConnectionState::Disconnected);
        tracing::info!(
            address = %inner.config.address,
            from = %previous,
            "event stream disconnected"
        );
        if previous == ConnectionState::Connected {
            inner.deliver(&Event::new(
                DISCONNECTED,
                json!({ "voluntary": true, "reason": CLIENT_DISCONNECT }),
            ));
        }
    }

    /// Returns `true` iff the state is Connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.status_tx.borrow().is_connected()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status_tx.borrow().state
    }

    /// Returns a snapshot of the connection health.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Registers `handler` for `event_type` (including the `connected` and
    /// `disconnected` pseudo-events).
    pub fn subscribe(&self, event_type: &str, handler: Subscriber) {
        self.inner.dispatcher.subscribe(event_type, handler);
    }

    /// Removes the first registration of `handler` for `event_type`.
    pub fn unsubscribe(&self, event_type: &str, handler: &Subscriber) -> bool {
        self.inner.dispatcher.unsubscribe(event_type, handler)
    }

    /// Bus carrying every delivered event, for forwarding out of process.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.inner.config.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Inner<T> {
    fn begin_connect(self: &Arc<Self>, st: &mut ManagerState) {
        if st.connection_state.is_active() {
            tracing::debug!(state = %st.connection_state, "connect ignored; already active");
            return;
        }
        st.voluntary_close = false;
        st.reconnect.cancel();
        st.epoch = st.epoch.wrapping_add(1);
        let epoch = st.epoch;
        self.transition(st, ConnectionState::Connecting);

        let weak = Arc::downgrade(self);
        let transport = Arc::clone(&self.transport);
        let address = self.config.address.clone();
        tracing::debug!(%address, epoch, "opening event stream");
        st.opening = Some(tokio::spawn(async move {
            let result = transport.open(&address).await;
            if let Some(inner) = weak.upgrade() {
                inner.finish_open(epoch, result).await;
            } else if let Ok(stream) = result {
                stream.sender.close();
            }
        }));
    }

    async fn finish_open(self: Arc<Self>, epoch: u64, result: Result<DuplexStream, ClientError>) {
        let mut st = self.state.lock().await;
        if st.epoch != epoch {
            if let Ok(stream) = result {
                stream.sender.close();
            }
            tracing::debug!(epoch, "discarding superseded open attempt");
            return;
        }
        // Our own handle; dropping it detaches.
        st.opening = None;

        match result {
            Ok(stream) => self.on_open(&mut st, epoch, stream),
            Err(err) => {
                tracing::warn!(
                    address = %self.config.address,
                    error = %err,
                    "failed to open event stream"
                );
                st.last_error_code = Some(err.error_code());
                self.handle_closure(&mut st, epoch, Some(err.to_string()));
            }
        }
    }

    fn on_open(self: &Arc<Self>, st: &mut ManagerState, epoch: u64, stream: DuplexStream) {
        let DuplexStream { sender, events } = stream;
        let connection_id = Uuid::new_v4();
        let now = Utc::now();

        st.link = Some(sender);
        st.connection_id = Some(connection_id);
        st.connected_since = Some(now);
        st.reconnect.reset();
        self.transition(st, ConnectionState::Connected);

        let weak = Arc::downgrade(self);
        st.heartbeat.start(move || {
            let weak = Weak::clone(&weak);
            async move { Self::send_probe(&weak, epoch).await }
        });

        tracing::info!(
            address = %self.config.address,
            %connection_id,
            heartbeat_ms = u64::try_from(st.heartbeat.interval().as_millis()).unwrap_or(u64::MAX),
            "event stream connected"
        );
        self.deliver(&Event::new(
            CONNECTED,
            json!({
                "address": self.config.address,
                "connection_id": connection_id,
                "timestamp": now,
            }),
        ));

        st.reader = Some(tokio::spawn(Self::read_loop(Arc::downgrade(self), epoch, events)));
    }

    async fn send_probe(weak: &Weak<Self>, epoch: u64) -> bool {
        let Some(inner) = weak.upgrade() else {
            return false;
        };
        let st = inner.state.lock().await;
        if st.epoch != epoch || st.connection_state != ConnectionState::Connected {
            return false;
        }
        let Some(link) = &st.link else {
            return false;
        };
        match link.send_text(PING_FRAME) {
            Ok(()) => tracing::trace!("heartbeat probe sent"),
            // The transport's close signal follows.
            Err(err) => tracing::debug!(error = %err, "heartbeat probe not sent"),
        }
        true
    }

    async fn read_loop(weak: Weak<Self>, epoch: u64, mut events: mpsc::Receiver<TransportEvent>) {
        let reason = loop {
            match events.recv().await {
                Some(TransportEvent::Frame(raw)) => {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    inner.handle_frame(&raw);
                }
                Some(TransportEvent::Closed(reason)) => break reason,
                None => break None,
            }
        };

        if let Some(inner) = weak.upgrade() {
            inner.on_closed(epoch, reason).await;
        }
    }

    async fn on_closed(self: Arc<Self>, epoch: u64, reason: Option<CloseReason>) {
        let mut st = self.state.lock().await;
        if st.epoch != epoch {
            return;
        }
        // This runs on the reader task itself.
        st.reader = None;

        // No close code: the link broke rather than being closed.
        let broken = reason.as_ref().is_none_or(|r| r.code.is_none());
        let reason = reason.map(|r| r.to_string());
        if broken {
            let err = ClientError::Transport(
                reason
                    .clone()
                    .unwrap_or_else(|| "stream ended without close".to_string()),
            );
            tracing::warn!(address = %self.config.address, error = %err, "event stream lost");
            st.last_error_code = Some(err.error_code());
        } else {
            tracing::warn!(
                address = %self.config.address,
                reason = reason.as_deref().unwrap_or("none"),
                "event stream closed"
            );
        }
        self.handle_closure(&mut st, epoch, reason);
    }

    /// Common closure path for open failures and lost links.
    ///
    /// Delivers `disconnected` when a live connection ended.
    fn handle_closure(
        self: &Arc<Self>,
        st: &mut ManagerState,
        epoch: u64,
        reason: Option<String>,
    ) {
        st.heartbeat.stop();
        if let Some(link) = st.link.take() {
            link.close();
        }
        let was_connected = st.connection_state == ConnectionState::Connected;
        st.connection_id = None;
        st.connected_since = None;
        st.last_close_reason = reason.clone();

        if st.voluntary_close {
            self.transition(st, ConnectionState::Disconnected);
        } else if st.reconnect.exhausted() {
            tracing::warn!(
                address = %self.config.address,
                attempts = st.reconnect.attempts(),
                "reconnect attempts exhausted; giving up"
            );
            self.transition(st, ConnectionState::Disconnected);
        } else {
            let weak = Arc::downgrade(self);
            match st
                .reconnect
                .schedule(async move { Self::reconnect_fired(weak, epoch).await })
            {
                Some(delay) => tracing::info!(
                    address = %self.config.address,
                    attempt = st.reconnect.attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect scheduled"
                ),
                None => tracing::debug!("reconnect already pending"),
            }
            self.transition(st, ConnectionState::Reconnecting);
        }

        if was_connected {
            self.deliver(&Event::new(
                DISCONNECTED,
                json!({ "voluntary": st.voluntary_close, "reason": reason }),
            ));
        }
    }

    async fn reconnect_fired(weak: Weak<Self>, epoch: u64) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let mut st = inner.state.lock().await;
        if st.epoch != epoch
            || st.voluntary_close
            || st.connection_state != ConnectionState::Reconnecting
        {
            return;
        }
        st.reconnect.mark_fired();
        tracing::info!(
            address = %inner.config.address,
            attempt = st.reconnect.attempts(),
            "reconnecting"
        );
        inner.begin_connect(&mut st);
    }

    fn handle_frame(&self, raw: &str) {
        match Frame::decode(raw) {
            Ok(Frame::Heartbeat) => tracing::trace!("heartbeat reply"),
            Ok(Frame::Event(event)) => self.deliver(&event),
            Err(err) => tracing::warn!(error = %err, len = raw.len(), "dropping undecodable frame"),
        }
    }

    /// Runs local subscribers, then forwards on the bus.
    fn deliver(&self, event: &Event) {
        let outcome = self.dispatcher.dispatch(event);
        let forwarded = self.event_bus.publish(event.clone());
        tracing::trace!(
            event_type = event.event_type(),
            invoked = outcome.invoked,
            failed = outcome.failed,
            forwarded,
            "event delivered"
        );
    }

    fn transition(&self, st: &mut ManagerState, next: ConnectionState) {
        let previous = st.connection_state;
        st.connection_state = next;
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "connection state changed");
        }
        self.status_tx.send_replace(ConnectionStatus {
            state: st.connection_state,
            address: self.config.address.clone(),
            connection_id: st.connection_id,
            connected_since: st.connected_since,
            reconnect_attempts: st.reconnect.attempts(),
            last_close_reason: st.last_close_reason.clone(),
            last_error_code: st.last_error_code,
        });
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::{Mutex as StdMutex, PoisonError};
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::dispatch::handler_fn;
    use crate::domain::event::ALERT_NEW;
    use crate::transport::{MemoryPeer, MemoryTransport};

    type Seen = Arc<StdMutex<Vec<Event>>>;

    fn manager_with(config: ClientConfig) -> (ConnectionManager<MemoryTransport>, MemoryTransport) {
        let transport = MemoryTransport::new();
        let Ok(manager) = ConnectionManager::new(config, transport.clone()) else {
            panic!("valid config");
        };
        (manager, transport)
    }

    fn manager() -> (ConnectionManager<MemoryTransport>, MemoryTransport) {
        manager_with(ClientConfig::new("mem://events"))
    }

    fn collect(manager: &ConnectionManager<MemoryTransport>, event_type: &str) -> Seen {
        let seen = Seen::default();
        let sink = Arc::clone(&seen);
        manager.subscribe(
            event_type,
            handler_fn(move |event| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event.clone());
                Ok(())
            }),
        );
        seen
    }

    fn snapshot(seen: &Seen) -> Vec<Event> {
        seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn wait_for_state(manager: &ConnectionManager<MemoryTransport>, state: ConnectionState) {
        let mut rx = manager.watch_status();
        if rx.wait_for(|s| s.state == state).await.is_err() {
            panic!("status channel closed");
        }
    }

    async fn accept(transport: &MemoryTransport) -> MemoryPeer {
        let Some(peer) = transport.accept().await else {
            panic!("transport dropped");
        };
        peer
    }

    /// Lets spawned tasks run without crossing any timer deadline of note.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn connected() -> (ConnectionManager<MemoryTransport>, MemoryTransport, MemoryPeer) {
        let (manager, transport) = manager();
        manager.connect().await;
        let peer = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        settle().await;
        (manager, transport, peer)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let Err(err) = ConnectionManager::new(ClientConfig::new(""), MemoryTransport::new()) else {
            panic!("expected invalid config");
        };
        assert_eq!(err.error_code(), 1001);
    }

    #[tokio::test(start_paused = true)]
    async fn starts_disconnected() {
        let (manager, transport) = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        settle().await;
        assert_eq!(transport.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected_and_announces_it() {
        let (manager, transport) = manager();
        let announced = collect(&manager, CONNECTED);

        manager.connect().await;
        let peer = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        settle().await;

        assert!(manager.is_connected());
        assert_eq!(peer.address(), "mem://events");
        let status = manager.status();
        assert!(status.connection_id.is_some());
        assert!(status.connected_since.is_some());

        let events = snapshot(&announced);
        assert_eq!(events.len(), 1);
        let Some(event) = events.first() else {
            panic!("no connected event");
        };
        assert_eq!(event.payload()["address"], "mem://events");
        assert_eq!(
            event.payload()["connection_id"],
            json!(status.connection_id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let (manager, transport) = manager();
        manager.connect().await;
        manager.connect().await;
        let _peer = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.connect().await;
        settle().await;

        assert_eq!(transport.attempt_count(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn events_arrive_in_order_after_connected() {
        let (manager, transport) = manager();
        let seen = Seen::default();
        for event_type in [CONNECTED, ALERT_NEW] {
            let sink = Arc::clone(&seen);
            manager.subscribe(
                event_type,
                handler_fn(move |event| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(event.clone());
                    Ok(())
                }),
            );
        }

        manager.connect().await;
        let peer = accept(&transport).await;
        for id in ["A", "B", "C"] {
            let frame = json!({ "type": ALERT_NEW, "data": { "id": id } }).to_string();
            assert!(peer.send_text(frame).await.is_ok());
        }
        settle().await;

        let events = snapshot(&seen);
        let kinds: Vec<&str> = events.iter().map(Event::event_type).collect();
        assert_eq!(kinds, vec![CONNECTED, ALERT_NEW, ALERT_NEW, ALERT_NEW]);
        let ids: Vec<&serde_json::Value> =
            events.iter().skip(1).map(|e| &e.payload()["id"]).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_replies_and_garbage_are_not_dispatched() {
        let (manager, _transport, peer) = connected().await;
        let pongs = collect(&manager, "pong");
        let alerts = collect(&manager, ALERT_NEW);
        let mut bus = manager.event_bus().subscribe();

        for frame in ["pong", r#"{"type":"pong"}"#, "{broken", r#"{"data":1}"#] {
            assert!(peer.send_text(frame).await.is_ok());
        }
        let alert = json!({ "type": ALERT_NEW, "data": { "id": "alert_001" } }).to_string();
        assert!(peer.send_text(alert).await.is_ok());
        settle().await;

        assert!(snapshot(&pongs).is_empty());
        assert_eq!(snapshot(&alerts).len(), 1);
        assert!(manager.is_connected());

        let Some(forwarded) = bus.recv().await else {
            panic!("expected forwarded alert");
        };
        assert_eq!(forwarded.event_type(), ALERT_NEW);
        assert!(bus.try_recv().is_none());
        assert_eq!(bus.skipped(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_subscriber_is_isolated_from_the_connection() {
        let (manager, _transport, peer) = connected().await;
        manager.subscribe(ALERT_NEW, handler_fn(|_| anyhow::bail!("subscriber broke")));
        let seen = collect(&manager, ALERT_NEW);

        let payload = json!({ "id": "alert_001", "cameraId": 1, "severity": "high" });
        let frame = json!({ "type": ALERT_NEW, "data": payload }).to_string();
        assert!(peer.send_text(frame).await.is_ok());
        settle().await;

        let events = snapshot(&seen);
        assert_eq!(events.len(), 1);
        assert_eq!(events.first().map(Event::payload), Some(&payload));
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_handler_sees_nothing() {
        let (manager, _transport, peer) = connected().await;
        let seen = Seen::default();
        let sink = Arc::clone(&seen);
        let handler = handler_fn(move |event| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
            Ok(())
        });
        manager.subscribe(ALERT_NEW, Arc::clone(&handler));
        assert!(manager.unsubscribe(ALERT_NEW, &handler));

        let frame = json!({ "type": ALERT_NEW, "data": {} }).to_string();
        assert!(peer.send_text(frame).await.is_ok());
        settle().await;
        assert!(snapshot(&seen).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn probes_only_while_connected() {
        let (manager, transport, mut peer) = connected().await;

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(peer.drain(), vec!["ping".to_string(), "ping".to_string()]);

        transport.set_refusing(true);
        peer.close(None).await;
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(peer.drain().is_empty());
        assert!(peer.client_closed());
        assert!(transport.try_accept().await.is_none());
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn involuntary_close_reconnects_once_after_delay() {
        let (manager, transport, mut peer) = connected().await;
        let lost = collect(&manager, DISCONNECTED);

        let closed_at = Instant::now();
        peer.close(Some(CloseReason::new(Some(1011), "server restart"))).await;
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        let status = manager.status();
        assert_eq!(status.reconnect_attempts, 1);
        assert_eq!(
            status.last_close_reason.as_deref(),
            Some("close code 1011: server restart")
        );
        let notices = snapshot(&lost);
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices.first().map(|e| e.payload()["voluntary"].clone()),
            Some(json!(false))
        );

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(transport.attempt_count(), 1);

        let _second = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;

        let attempts = transport.attempts();
        assert_eq!(attempts.len(), 2);
        let Some(retry) = attempts.get(1) else {
            panic!("missing retry");
        };
        assert!(retry.at.duration_since(closed_at) >= Duration::from_secs(5));
        assert_eq!(manager.status().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_peer_counts_as_involuntary_close() {
        let (manager, transport, peer) = connected().await;
        drop(peer);
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(manager.status().last_error_code, Some(2004));
        let _second = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_retries_until_success() {
        let (manager, transport) = manager();
        transport.set_refusing(true);
        manager.connect().await;
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(manager.status().last_error_code, Some(2001));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(transport.attempt_count(), 2);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        transport.set_refusing(false);
        let _peer = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.attempt_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (manager, transport, mut peer) = connected().await;
        peer.close(None).await;
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempt_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_heartbeat_and_closes_link() {
        let (manager, _transport, mut peer) = connected().await;
        let lost = collect(&manager, DISCONNECTED);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(peer.drain(), vec!["ping".to_string()]);

        manager.disconnect().await;
        assert!(!manager.is_connected());
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert!(peer.drain().is_empty());
        assert!(peer.client_closed());
        let notices = snapshot(&lost);
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices.first().map(|e| e.payload()["voluntary"].clone()),
            Some(json!(true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_idempotent_from_any_state() {
        let (manager, transport) = manager();
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connect().await;
        assert_eq!(manager.state(), ConnectionState::Connecting);
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        // The open task was aborted before it ever ran.
        assert_eq!(transport.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_transport_close_after_disconnect_is_ignored() {
        let (manager, transport, mut peer) = connected().await;
        manager.disconnect().await;
        peer.close(Some(CloseReason::new(Some(1006), "abnormal"))).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 1);
        assert_eq!(
            manager.status().last_close_reason.as_deref(),
            Some(CLIENT_DISCONNECT)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_after_disconnect_opens_again() {
        let (manager, transport, _peer) = connected().await;
        manager.disconnect().await;
        manager.connect().await;
        let _again = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(transport.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_settle_disconnected() {
        let mut config = ClientConfig::new("mem://events");
        config.max_reconnect_attempts = Some(2);
        let (manager, transport) = manager_with(config);
        transport.set_refusing(true);

        manager.connect().await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_manager_cancels_timers() {
        let (manager, transport, mut peer) = connected().await;
        peer.close(None).await;
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        drop(manager);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_managers_do_not_interfere() {
        let (first, first_transport, _first_peer) = connected().await;
        let (second, second_transport, _second_peer) = connected().await;

        second.disconnect().await;
        settle().await;

        assert!(first.is_connected());
        assert!(!second.is_connected());
        assert_eq!(first_transport.attempt_count(), 1);
        assert_eq!(second_transport.attempt_count(), 1);
    }

    fn collect_lifecycle(manager: &ConnectionManager<MemoryTransport>) -> Seen {
        let seen = Seen::default();
        for event_type in [CONNECTED, DISCONNECTED] {
            let sink = Arc::clone(&seen);
            manager.subscribe(
                event_type,
                handler_fn(move |event| {
                    sink.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(event.clone());
                    Ok(())
                }),
            );
        }
        seen
    }

    fn kinds(seen: &Seen) -> Vec<String> {
        snapshot(seen)
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_open_leaves_exactly_one_live_link() {
        let (manager, transport) = manager();
        transport.hold_opens(true);

        manager.connect().await;
        settle().await;
        let Some(mut stale) = transport.try_accept().await else {
            panic!("first open did not start");
        };
        manager.connect().await;
        assert_eq!(transport.attempt_count(), 1);

        manager.disconnect().await;
        manager.connect().await;
        settle().await;
        let Some(mut live) = transport.try_accept().await else {
            panic!("second open did not start");
        };

        transport.hold_opens(false);
        wait_for_state(&manager, ConnectionState::Connected).await;
        settle().await;

        assert!(stale.drain().is_empty());
        assert!(stale.client_closed());
        assert!(stale.send_text("late").await.is_err());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(live.drain(), vec!["ping".to_string()]);
        assert!(!live.client_closed());

        assert!(transport.try_accept().await.is_none());
        assert_eq!(transport.attempt_count(), 2);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_right_after_connected_keeps_notices_paired() {
        let (manager, transport) = manager();
        let seen = collect_lifecycle(&manager);

        manager.connect().await;
        let _peer = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        manager.disconnect().await;
        settle().await;

        assert_eq!(kinds(&seen), vec![CONNECTED, DISCONNECTED]);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_is_visible_before_the_first_frame() {
        let (manager, transport) = manager();
        let seen = collect_lifecycle(&manager);

        manager.connect().await;
        let peer = accept(&transport).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(kinds(&seen), vec![CONNECTED]);

        drop(peer);
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(kinds(&seen), vec![CONNECTED, DISCONNECTED]);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_connecting_emits_no_notices() {
        let (manager, transport) = manager();
        let seen = collect_lifecycle(&manager);
        transport.hold_opens(true);

        manager.connect().await;
        settle().await;
        manager.disconnect().await;
        transport.hold_opens(false);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(kinds(&seen).is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_remote_close_is_not_a_transport_error() {
        let (manager, _transport, mut peer) = connected().await;
        peer.close(Some(CloseReason::new(Some(1000), "bye"))).await;
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(manager.status().last_error_code, None);
    }
}
