//! Periodic keep-alive probes.
//!
//! [`HeartbeatMonitor`] owns at most one ticker task. It does not decide
//! liveness: dead links are detected by the transport's close signal. The
//! probe itself is supplied by the caller, which keeps the monitor free of
//! connection state; the probe returns `false` to stop ticking.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Keep-alive ticker for one open connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    /// Creates a stopped monitor that will tick every `interval`.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            task: None,
        }
    }

    /// Returns the tick interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts ticking, replacing any running ticker.
    ///
    /// The first probe runs one full interval after this call.
    pub fn start<F, Fut>(&mut self, mut probe: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.stop();
        let period = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !probe().await {
                    break;
                }
            }
        }));
        tracing::trace!(
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "heartbeat started"
        );
    }

    /// Cancels the ticker. Returns `false` if it was not running.
    pub fn stop(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                tracing::trace!("heartbeat stopped");
                true
            }
            None => false,
        }
    }

    /// Returns `true` while a ticker is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
