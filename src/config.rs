//! Event client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Configuration is passed to
//! [`crate::client::ConnectionManager::new`] at construction, so several
//! independent clients can coexist in one process.

use std::time::Duration;

use crate::error::ClientError;

/// Default backend event endpoint.
pub const DEFAULT_ADDRESS: &str = "ws://localhost:8000/ws/events";

/// Default heartbeat interval in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Default capacity of the [`crate::domain::EventBus`].
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 1_024;

/// Top-level event client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Connection target (e.g. `ws://localhost:8000/ws/events`).
    pub address: String,

    /// Milliseconds between heartbeat probes while connected.
    pub heartbeat_interval_ms: u64,

    /// Delay before the first reconnect attempt after an involuntary closure.
    pub reconnect_delay_ms: u64,

    /// Upper bound for the backoff delay. Equal to `reconnect_delay_ms`
    /// means a fixed delay.
    pub reconnect_max_delay_ms: u64,

    /// Backoff growth factor per consecutive failed attempt (1 = fixed).
    pub reconnect_multiplier: u32,

    /// Adds up to a quarter of the computed delay as random jitter.
    pub reconnect_jitter: bool,

    /// Give up after this many consecutive attempts (`None` = never).
    pub max_reconnect_attempts: Option<u32>,

    /// Capacity of the event broadcast channel.
    pub event_bus_capacity: usize,
}

impl ClientConfig {
    /// Creates a configuration for `address` with all other settings at
    /// their defaults.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or cannot be
    /// parsed. Calls `dotenvy::dotenv().ok()` to optionally load a `.env`
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] if the resulting values fail
    /// [`ClientConfig::validate`].
    pub fn from_env() -> Result<Self, ClientError> {
        dotenvy::dotenv().ok();

        let address =
            std::env::var("EVENTS_ADDRESS").unwrap_or_else(|_| DEFAULT_ADDRESS.to_string());

        let heartbeat_interval_ms =
            parse_env("EVENTS_HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS);
        let reconnect_delay_ms = parse_env("EVENTS_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS);
        let reconnect_max_delay_ms =
            parse_env("EVENTS_RECONNECT_MAX_DELAY_MS", reconnect_delay_ms);
        let reconnect_multiplier = parse_env("EVENTS_RECONNECT_MULTIPLIER", 1);
        let reconnect_jitter = parse_env_bool("EVENTS_RECONNECT_JITTER", false);
        let max_reconnect_attempts = match parse_env("EVENTS_MAX_RECONNECT_ATTEMPTS", 0_u32) {
            0 => None,
            n => Some(n),
        };

        let event_bus_capacity = parse_env("EVENTS_BUS_CAPACITY", DEFAULT_EVENT_BUS_CAPACITY);

        let config = Self {
            address,
            heartbeat_interval_ms,
            reconnect_delay_ms,
            reconnect_max_delay_ms,
            reconnect_multiplier,
            reconnect_jitter,
            max_reconnect_attempts,
            event_bus_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfig`] naming the first offending
    /// setting.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.address.trim().is_empty() {
            return Err(ClientError::InvalidConfig("address is empty".to_string()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "reconnect delay must be positive".to_string(),
            ));
        }
        if self.reconnect_max_delay_ms < self.reconnect_delay_ms {
            return Err(ClientError::InvalidConfig(format!(
                "reconnect max delay {} ms is below base delay {} ms",
                self.reconnect_max_delay_ms, self.reconnect_delay_ms
            )));
        }
        if self.reconnect_multiplier == 0 {
            return Err(ClientError::InvalidConfig(
                "reconnect multiplier must be at least 1".to_string(),
            ));
        }
        if self.event_bus_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "event bus capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Heartbeat interval as a [`Duration`].
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Base reconnect delay as a [`Duration`].
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect_multiplier: 1,
            reconnect_jitter: false,
            max_reconnect_attempts: None,
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_endpoint() {
        let config = ClientConfig::default();
        assert_eq!(config.address, "ws://localhost:8000/ws/events");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.reconnect_max_delay_ms, config.reconnect_delay_ms);
        assert!(config.max_reconnect_attempts.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn new_overrides_address_only() {
        let config = ClientConfig::new("ws://10.0.0.5:9000/events");
        assert_eq!(config.address, "ws://10.0.0.5:9000/events");
        assert_eq!(config.heartbeat_interval_ms, DEFAULT_HEARTBEAT_INTERVAL_MS);
    }

    #[test]
    fn empty_address_rejected() {
        let config = ClientConfig::new("  ");
        let Err(err) = config.validate() else {
            panic!("expected validation failure");
        };
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn zero_intervals_rejected() {
        let mut config = ClientConfig::default();
        config.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.reconnect_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_delay_below_base_rejected() {
        let mut config = ClientConfig::default();
        config.reconnect_max_delay_ms = config.reconnect_delay_ms - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_multiplier_and_capacity_rejected() {
        let mut config = ClientConfig::default();
        config.reconnect_multiplier = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.event_bus_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_env_falls_back_on_missing_key() {
        let value: u64 = parse_env("EVENTS_TEST_SURELY_UNSET_KEY", 42);
        assert_eq!(value, 42);
        assert!(parse_env_bool("EVENTS_TEST_SURELY_UNSET_FLAG", true));
    }
}
