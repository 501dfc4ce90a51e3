//! Client core: connection lifecycle, keep-alive and reconnect timing.

pub mod heartbeat;
pub mod manager;
pub mod reconnect;

pub use heartbeat::HeartbeatMonitor;
pub use manager::ConnectionManager;
pub use reconnect::{ReconnectPolicy, ReconnectScheduler};
