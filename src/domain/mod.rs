//! Domain layer: connection state, events, wire frames, and the event bus.
//!
//! Everything here is transport-agnostic. The connection manager owns the
//! lifecycle; these types describe what flows through it.

pub mod connection_state;
pub mod event;
pub mod event_bus;
pub mod frame;
pub mod status;

pub use connection_state::ConnectionState;
pub use event::Event;
pub use event_bus::{EventBus, EventReceiver};
pub use frame::Frame;
pub use status::ConnectionStatus;
