//! Reference counting for objects whose teardown is deferred until every
//! holder has let go.
//!
//! A [`RefCount`] starts with one reference held by its creator. There are
//! two release paths that decrement the same counter: a direct holder
//! releasing ([`RefCount::release`]) and an owning container releasing its
//! hold ([`RefCount::release_from_container`]). Only the transition to zero
//! invokes a hook, and each path has its own hook on [`ReleaseHooks`].

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{DbError, DbResult};

/// Extension points invoked when the last reference goes away.
pub trait ReleaseHooks {
    /// A direct holder released the last reference.
    fn on_all_references_released(&self);

    /// The owning container released the last reference.
    ///
    /// Defaults to [`ReleaseHooks::on_all_references_released`].
    fn on_all_references_released_from_container(&self) {
        self.on_all_references_released();
    }
}

/// Which release path dropped the count to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// References remain.
    Held,
    /// A direct holder released the last reference.
    ByHolder,
    /// The owning container released the last reference.
    ByContainer,
}

/// Counter shared by everything that holds the resource.
#[derive(Debug)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// Creates a counter holding the creator's reference.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
        }
    }

    /// Takes another reference.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] if every reference was already released;
    /// a torn-down resource cannot be revived.
    pub fn acquire(&self, what: &str) -> DbResult<()> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then_some(count + 1)
            })
            .map(|_| ())
            .map_err(|_| DbError::closed(what.to_string()))
    }

    /// Releases a reference held directly.
    pub fn release(&self, hooks: &impl ReleaseHooks) -> Released {
        if self.decrement() {
            hooks.on_all_references_released();
            Released::ByHolder
        } else {
            Released::Held
        }
    }

    /// Releases the reference held by an owning container.
    pub fn release_from_container(&self, hooks: &impl ReleaseHooks) -> Released {
        if self.decrement() {
            hooks.on_all_references_released_from_container();
            Released::ByContainer
        } else {
            Released::Held
        }
    }

    /// Returns the number of outstanding references.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns `true` once every reference was released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.count() == 0
    }

    /// Decrements, saturating at zero. Returns `true` on the 1 -> 0 transition.
    fn decrement(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_ok_and(|previous| previous == 1)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// Hooks that do nothing, for resources with no teardown beyond the count.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl ReleaseHooks for NoHooks {
    fn on_all_references_released(&self) {}
}
