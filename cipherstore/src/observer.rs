//! Observer registries.
//!
//! Registration is strict: registering an observer that is already present
//! and unregistering one that is absent are both [`DbError::IllegalState`].
//! Observers are identified by the address of their `Arc`, so the same
//! `Arc` (or a clone of it) is the same registrant.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DbError, DbResult};

/// Receives notifications about a cursor's row set.
pub trait DataSetObserver: Send + Sync {
    /// The row set changed, typically after a successful requery.
    fn on_changed(&self) {}

    /// The row set is no longer valid, after deactivate or close.
    fn on_invalidated(&self) {}
}

/// Receives notifications that the underlying store changed.
pub trait ContentObserver: Send + Sync {
    /// Content changed. `self_change` is `true` when the change originated
    /// from the notifying object itself.
    fn on_change(&self, self_change: bool);
}

/// Set of observers keyed by identity.
pub struct ObserverRegistry<T: ?Sized> {
    observers: HashMap<usize, Arc<T>>,
}

fn identity<T: ?Sized>(observer: &Arc<T>) -> usize {
    Arc::as_ptr(observer).cast::<()>() as usize
}

impl<T: ?Sized> ObserverRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: HashMap::new(),
        }
    }

    /// Adds `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if it is already registered.
    pub fn register(&mut self, observer: Arc<T>) -> DbResult<()> {
        let key = identity(&observer);
        if self.observers.contains_key(&key) {
            return Err(DbError::illegal_state(format!(
                "observer {key:#x} is already registered"
            )));
        }
        self.observers.insert(key, observer);
        Ok(())
    }

    /// Removes `observer`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if it was not registered.
    pub fn unregister(&mut self, observer: &Arc<T>) -> DbResult<()> {
        let key = identity(observer);
        self.observers
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| DbError::illegal_state(format!("observer {key:#x} was not registered")))
    }

    /// Removes every observer.
    pub fn unregister_all(&mut self) {
        self.observers.clear();
    }

    /// Returns `true` if `observer` is registered.
    #[must_use]
    pub fn contains(&self, observer: &Arc<T>) -> bool {
        self.observers.contains_key(&identity(observer))
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Clones the current observers so they can be notified without holding
    /// the lock that guards the registry.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.observers.values().cloned().collect()
    }
}

impl<T: ?Sized> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("len", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Calls `on_changed` on every observer in `observers`.
pub(crate) fn notify_changed(observers: &[Arc<dyn DataSetObserver>]) {
    for observer in observers {
        observer.on_changed();
    }
}

/// Calls `on_invalidated` on every observer in `observers`.
pub(crate) fn notify_invalidated(observers: &[Arc<dyn DataSetObserver>]) {
    for observer in observers {
        observer.on_invalidated();
    }
}

/// Calls `on_change` on every observer in `observers`.
pub(crate) fn notify_content_changed(observers: &[Arc<dyn ContentObserver>], self_change: bool) {
    for observer in observers {
        observer.on_change(self_change);
    }
}
