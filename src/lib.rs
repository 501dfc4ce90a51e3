//! # cctv-events
//!
//! Real-time event client for the CCTV monitoring backend.
//!
//! This crate keeps one long-lived connection to the backend's event
//! stream, probes it with periodic heartbeats, reconnects after involuntary
//! closures, and fans decoded events out to subscribers keyed by event
//! type. The wire transport is pluggable; WebSocket is the default.
//!
//! ## Architecture
//!
//! ```text
//! Backend (ws://host/ws/events)
//!     │
//!     ├── Transport (transport/)        WebSocket | in-memory
//!     │
//!     ├── ConnectionManager (client/)
//!     │     ├── HeartbeatMonitor
//!     │     └── ReconnectScheduler
//!     │
//!     ├── Frame decoding (domain/)
//!     │
//!     ├── EventDispatcher (dispatch/)   per-type subscribers
//!     └── EventBus (domain/)            broadcast to other consumers
//! ```

pub mod client;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod transport;
