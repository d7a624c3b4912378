//! Observer registry for [`SyncState`].
//!
//! Delivery is synchronous and serialized: every subscriber sees transitions
//! in the order they were published, and a new subscriber is handed the
//! current state before any later transition. Callbacks must not call back
//! into `publish`/`update`/`subscribe` on the same publisher.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::sync_state_model::SyncState;

type Callback = Arc<dyn Fn(&SyncState) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Registry {
    state: SyncState,
    next_id: u64,
    subscribers: Vec<(u64, Callback)>,
}

pub struct SyncStatusPublisher {
    registry: Arc<Mutex<Registry>>,
    /// Held while callbacks run so deliveries never interleave.
    delivery: Mutex<()>,
}

impl Default for SyncStatusPublisher {
    fn default() -> Self {
        Self::new(SyncState::default())
    }
}

impl SyncStatusPublisher {
    pub fn new(initial: SyncState) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                state: initial,
                next_id: 0,
                subscribers: Vec::new(),
            })),
            delivery: Mutex::new(()),
        }
    }

    pub fn current(&self) -> SyncState {
        lock(&self.registry).state.clone()
    }

    /// Registers `callback` and immediately calls it with the current state.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let _delivery = lock(&self.delivery);
        let (id, current) = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.subscribers.push((id, Arc::clone(&callback)));
            (id, registry.state.clone())
        };
        callback(&current);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Replaces the state. Returns false (and notifies nobody) if unchanged.
    pub fn publish(&self, state: SyncState) -> bool {
        self.update(|current| *current = state)
    }

    /// Applies `mutate` to the current state and publishes the result if it changed.
    pub fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut SyncState),
    {
        let _delivery = lock(&self.delivery);
        let (next, subscribers) = {
            let mut registry = lock(&self.registry);
            let mut next = registry.state.clone();
            mutate(&mut next);
            if next == registry.state {
                return false;
            }
            registry.state = next.clone();
            let subscribers: Vec<Callback> = registry
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect();
            (next, subscribers)
        };
        for callback in subscribers {
            callback(&next);
        }
        true
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }
}

/// Handle returned by [`SyncStatusPublisher::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry)
                .subscribers
                .retain(|(id, _)| *id != self.id);
        }
    }
}
