//! Invalidation Bus
//!
//! Per-key listener lists notified after successful mutations. Listeners run
//! synchronously on the mutating task, in registration order. Nothing here is
//! persisted.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

/// Listener callback: key and new value (`None` on delete/clear).
pub type Listener = Arc<dyn Fn(&str, Option<&[u8]>) + Send + Sync>;

#[derive(Default)]
pub struct InvalidationBus {
    listeners: Mutex<HashMap<String, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("keys", &self.listeners.lock().len())
            .finish()
    }
}

impl InvalidationBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `listener` for `key`.
    pub fn subscribe<F>(self: &Arc<Self>, key: &str, listener: F) -> Subscription
    where
        F: Fn(&str, Option<&[u8]>) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            bus: Arc::downgrade(self),
            key: key.to_string(),
            id,
        }
    }

    fn unsubscribe(&self, key: &str, id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(list) = listeners.get_mut(key) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                listeners.remove(key);
            }
        }
    }

    /// Notifies subscribers of `key`.
    ///
    /// The listener list is copied out before delivery, so a listener may
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, key: &str, value: Option<&[u8]>) {
        let targets: Vec<Listener> = match self.listeners.lock().get(key) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        deliver(key, value, &targets);
    }

    /// Notifies every key that has subscribers with `None`.
    pub fn publish_clear(&self) {
        let targets: Vec<(String, Vec<Listener>)> = self
            .listeners
            .lock()
            .iter()
            .map(|(key, list)| {
                (
                    key.clone(),
                    list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                )
            })
            .collect();

        for (key, listeners) in targets {
            deliver(&key, None, &listeners);
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.listeners.lock().get(key).map_or(0, Vec::len)
    }
}

fn deliver(key: &str, value: Option<&[u8]>, listeners: &[Listener]) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(key, value))).is_err() {
            warn!(key = %key, "Invalidation listener panicked");
        }
    }
}

// == Subscription ==
/// Handle returned by `subscribe`. Dropping it keeps the listener registered.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<InvalidationBus>,
    key: String,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.key, self.id);
        }
    }
}
