// src/io/subscription.rs
//
// Single-subscriber listener slot. Producers look up the current subscriber
// on every event; with no subscriber the event is dropped.

use std::sync::{Arc, RwLock};

pub struct Subscription<T: ?Sized> {
    slot: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Subscription<T> {
    pub fn new() -> Self {
        Subscription {
            slot: RwLock::new(None),
        }
    }

    /// Install `listener`, replacing any previous one.
    pub fn set(&self, listener: Arc<T>) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = Some(listener);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.write() {
            *slot = None;
        }
    }

    /// Current subscriber, if any.
    pub fn current(&self) -> Option<Arc<T>> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }
}

impl<T: ?Sized> Default for Subscription<T> {
    fn default() -> Self {
        Self::new()
    }
}
