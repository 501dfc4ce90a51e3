//! Event dispatch: subscriber registry and fan-out.
//!
//! Subscribers are shared handler objects ([`Subscriber`]). The same
//! `Arc` passed to `subscribe` is the identity used by `unsubscribe`.

pub mod dispatcher;
pub mod registry;

use std::sync::Arc;

use crate::domain::Event;

pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use registry::SubscriberRegistry;

/// Callback interested in events of one type.
///
/// Handlers run synchronously on the connection's reader task; long work
/// should be handed off (e.g. to a channel).
pub trait EventHandler: Send + Sync {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher and otherwise ignored.
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

/// Shared handle to a registered handler.
pub type Subscriber = Arc<dyn EventHandler>;

/// Wraps a closure as a [`Subscriber`].
///
/// Keep a clone of the returned `Arc` to unsubscribe later.
pub fn handler_fn<F>(f: F) -> Subscriber
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}
