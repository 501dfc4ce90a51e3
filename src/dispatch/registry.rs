//! Ordered multimap of subscribers keyed by event type.
//!
//! Insertion order is preserved per type and duplicate registrations are
//! kept. Removal is by handler identity (the `Arc` allocation), first match
//! only, since one handler may be registered several times.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Subscriber;

/// Subscribers registered per event type.
#[derive(Default)]
pub struct SubscriberRegistry {
    handlers: HashMap<String, Vec<Subscriber>>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the sequence for `event_type`.
    pub fn add(&mut self, event_type: &str, handler: Subscriber) {
        self.handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Removes the first registration of `handler` for `event_type`.
    ///
    /// Returns `false` if the type or the handler is not registered.
    pub fn remove(&mut self, event_type: &str, handler: &Subscriber) -> bool {
        let Some(list) = self.handlers.get_mut(event_type) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| same_handler(h, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.handlers.remove(event_type);
        }
        true
    }

    /// Returns a copy of the current sequence for `event_type`.
    ///
    /// Empty if nothing is registered.
    #[must_use]
    pub fn snapshot(&self, event_type: &str) -> Vec<Subscriber> {
        self.handlers.get(event_type).cloned().unwrap_or_default()
    }

    /// Returns the number of registrations for `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Returns the number of registrations across all types.
    #[must_use]
    pub fn total(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (event_type, list) in &self.handlers {
            map.entry(event_type, &list.len());
        }
        map.finish()
    }
}

/// Identity comparison on the handler allocation, ignoring vtables.
fn same_handler(a: &Subscriber, b: &Subscriber) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
