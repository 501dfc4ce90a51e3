//! Reconnect timing: delay policy and the single pending attempt.
//!
//! [`ReconnectScheduler`] holds at most one pending single-shot timer. A
//! second `schedule` while one is pending is a no-op, so a burst of
//! closures never stacks timers. The default policy is a fixed delay;
//! bounded exponential backoff with additive jitter is opt-in.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;

/// How long to wait before each reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Cap for the exponential part (jitter is added on top).
    pub max_delay: Duration,
    /// Growth factor per consecutive attempt; 1 keeps the delay fixed.
    pub multiplier: u32,
    /// Add up to a quarter of the delay at random.
    pub jitter: bool,
    /// Stop scheduling after this many consecutive attempts.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Fixed delay, unlimited attempts, no jitter.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            multiplier: 1,
            jitter: false,
            max_attempts: None,
        }
    }

    /// Builds the policy from the client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: config.reconnect_delay(),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            multiplier: config.reconnect_multiplier.max(1),
            jitter: config.reconnect_jitter,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before attempt number `attempt` (0-based).
    ///
    /// Never shorter than `base_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis())
            .unwrap_or(u64::MAX)
            .max(base_ms);
        let growth = u64::from(self.multiplier.max(1)).saturating_pow(attempt);
        let ms = base_ms.saturating_mul(growth).min(max_ms);

        let jitter_ms = if self.jitter && ms >= 4 {
            rand::thread_rng().gen_range(0..=ms / 4)
        } else {
            0
        };
        Duration::from_millis(ms.saturating_add(jitter_ms))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Owner of the single pending reconnect timer.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    pending: Option<JoinHandle<()>>,
    attempts: u32,
}

impl ReconnectScheduler {
    /// Creates an idle scheduler.
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            pending: None,
            attempts: 0,
        }
    }

    /// Arms a single-shot timer that runs `action` after the policy delay.
    ///
    /// Returns the delay, or `None` if an attempt is already pending (the
    /// new `action` is dropped).
    pub fn schedule<Fut>(&mut self, action: Fut) -> Option<Duration>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_pending() {
            return None;
        }
        let delay = self.policy.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
        Some(delay)
    }

    /// Clears the pending flag from inside the firing action, without
    /// aborting it.
    pub fn mark_fired(&mut self) {
        self.pending = None;
    }

    /// Cancels the pending timer. Returns `false` if none was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(task) => {
                let was_pending = !task.is_finished();
                task.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Returns `true` while a timer is armed and has not completed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Resets the attempt counter (after a successful open or a voluntary
    /// disconnect).
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts scheduled since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns `true` once the policy's attempt limit is reached.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
