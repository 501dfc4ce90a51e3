//! cctv-events entry point.
//!
//! Connects to the backend event stream and logs every alert, process and
//! camera status event until interrupted.

use tracing_subscriber::EnvFilter;

use cctv_events::client::ConnectionManager;
use cctv_events::config::ClientConfig;
use cctv_events::dispatch::handler_fn;
use cctv_events::domain::event::{ALERT_NEW, CAMERA_STATUS_CHANGED, PROCESS_STATUS_CHANGED};
use cctv_events::transport::WebSocketTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = ClientConfig::from_env()?;
    tracing::info!(address = %config.address, "starting cctv-events");

    let manager = ConnectionManager::new(config, WebSocketTransport::new())?;

    // Log-only subscribers
    for event_type in [ALERT_NEW, PROCESS_STATUS_CHANGED, CAMERA_STATUS_CHANGED] {
        manager.subscribe(
            event_type,
            handler_fn(|event| {
                tracing::info!(
                    event_type = event.event_type(),
                    payload = %event.payload(),
                    "event received"
                );
                Ok(())
            }),
        );
    }

    // Status watcher
    let mut status = manager.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            tracing::info!(
                state = %current.state,
                attempts = current.reconnect_attempts,
                last_close = current.last_close_reason.as_deref().unwrap_or("-"),
                "connection status"
            );
        }
    });

    manager.connect().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    manager.disconnect().await;

    Ok(())
}
