//! Fan-out of decoded events to registered subscribers.
//!
//! [`EventDispatcher::dispatch`] takes a snapshot of the subscribers for the
//! event type, releases the registry lock, and only then calls the handlers.
//! Subscribing or unsubscribing while a dispatch is in flight (including from
//! inside a handler) therefore never affects the in-flight call.
//!
//! Every handler call is isolated: an `Err` return or a panic is logged and
//! counted, and the remaining handlers still run.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{PoisonError, RwLock};

use super::Subscriber;
use super::registry::SubscriberRegistry;
use crate::domain::Event;

/// Result of one [`EventDispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers invoked.
    pub invoked: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Owner of the [`SubscriberRegistry`].
#[derive(Debug, Default)]
pub struct EventDispatcher {
    registry: RwLock<SubscriberRegistry>,
}

impl EventDispatcher {
    /// Creates a dispatcher with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` for `event_type`. Duplicate registrations are kept.
    pub fn subscribe(&self, event_type: &str, handler: Subscriber) {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(event_type, handler);
        tracing::debug!(event_type, "subscriber added");
    }

    /// Removes the first registration of `handler` for `event_type`.
    ///
    /// Returns `false` (and does nothing) if it was not registered.
    pub fn unsubscribe(&self, event_type: &str, handler: &Subscriber) -> bool {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_type, handler);
        if removed {
            tracing::debug!(event_type, "subscriber removed");
        }
        removed
    }

    /// Returns the number of registrations for `event_type`.
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .count(event_type)
    }

    /// Invokes every subscriber of the event's type once, in registration
    /// order. No subscribers is not an error.
    pub fn dispatch(&self, event: &Event) -> DispatchOutcome {
        let handlers = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot(event.event_type());

        let mut outcome = DispatchOutcome::default();
        for handler in &handlers {
            outcome.invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        event_type = event.event_type(),
                        error = %err,
                        "subscriber failed"
                    );
                }
                Err(panic) => {
                    outcome.failed += 1;
                    tracing::error!(
                        event_type = event.event_type(),
                        panic = panic_message(panic.as_ref()),
                        "subscriber panicked"
                    );
                }
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
