//! Subscriber registry
//!
//! Ordered set of listener handles keyed by identity. Dispatch iterates a
//! snapshot, so listeners may add or remove handles (their own included)
//! while an event is being delivered.

use crate::core::InboundEvent;
use parking_lot::Mutex;
use std::sync::Arc;

/// Callback invoked for every delivered event
pub type Listener = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Wrap a closure into a [`Listener`] handle.
///
/// Keep the returned handle: removal is by identity, so the same `Arc`
/// (or a clone of it) must be passed to `remove_listener`.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&InboundEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Default)]
pub struct SubscriberRegistry {
    listeners: Mutex<Vec<Listener>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns false if it was already registered.
    pub fn add_listener(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        if listeners.iter().any(|l| same_listener(l, listener)) {
            return false;
        }
        listeners.push(listener.clone());
        true
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|l| same_listener(l, listener)) {
            Some(idx) => {
                listeners.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, listener: &Listener) -> bool {
        self.listeners.lock().iter().any(|l| same_listener(l, listener))
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Listeners registered right now, in registration order
    pub fn snapshot(&self) -> Vec<Listener> {
        self.listeners.lock().clone()
    }
}
