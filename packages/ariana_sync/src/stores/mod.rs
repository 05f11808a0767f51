//! Reactive stores: one per data kind.
//!
//! Each store owns its reconciled collection inside a `tokio::sync::watch`
//! channel. Consumers read the current value or wait for changes. Interest is
//! refcounted per scope: the first [`Interest`] subscribes, dropping the last
//! one tears the subscription down.

mod agents;
mod events;
mod projects;

pub use agents::{AgentScope, AgentsState, AgentsStore};
pub use events::{AgentEventsState, AgentEventsStore};
pub use projects::{ProjectsState, ProjectsStore};

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::client::Subscription;

/// Keeps a store scope subscribed while held.
#[must_use = "dropping an Interest releases it immediately"]
pub struct Interest {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Interest {
    pub(crate) fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn release(self) {}
}

impl Drop for Interest {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interest").finish_non_exhaustive()
    }
}

/// Refcounted subscriptions keyed by scope.
pub(crate) struct Scopes<K> {
    held: HashMap<K, (usize, Subscription)>,
}

impl<K: Hash + Eq> Default for Scopes<K> {
    fn default() -> Self {
        Self {
            held: HashMap::new(),
        }
    }
}

impl<K: Hash + Eq> Scopes<K> {
    /// Count one more interest in `key`, calling `start` only for the first.
    /// Returns true when `start` ran.
    pub(crate) fn acquire(&mut self, key: K, start: impl FnOnce() -> Subscription) -> bool {
        match self.held.get_mut(&key) {
            Some((count, _)) => {
                *count += 1;
                false
            }
            None => {
                self.held.insert(key, (1, start()));
                true
            }
        }
    }

    /// Drop one interest. Returns the subscription once the last one is gone.
    pub(crate) fn release(&mut self, key: &K) -> Option<Subscription> {
        let (count, _) = self.held.get_mut(key)?;
        *count -= 1;
        if *count > 0 {
            return None;
        }
        self.held.remove(key).map(|(_, sub)| sub)
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.held.contains_key(key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Store state stays consistent across a panicking handler, so poisoning is
/// ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
