//! Cooperative cancellation of in-flight queries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::InterruptHandle;

use crate::error::{DbError, DbResult};

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    interrupt: Mutex<Option<InterruptHandle>>,
}

/// Signal that cancels an operation from another thread.
///
/// Before execution starts the operation fails immediately. While a
/// statement runs, the connection it runs on is interrupted and the
/// statement fails with [`DbError::Canceled`]. A wait for a connection held
/// by another thread's transaction is abandoned.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    inner: Arc<Inner>,
}

impl CancellationSignal {
    /// Creates a signal that has not been canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the operation. Idempotent.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }
        let interrupt = self
            .inner
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = interrupt.as_ref() {
            handle.interrupt();
        }
    }

    /// Returns `true` once [`CancellationSignal::cancel`] was called.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Fails with [`DbError::Canceled`] if the signal fired.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Canceled`] once canceled.
    pub fn throw_if_canceled(&self) -> DbResult<()> {
        if self.is_canceled() {
            Err(DbError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Routes cancellation to `handle` until the returned guard is dropped.
    pub(crate) fn attach(&self, handle: InterruptHandle) -> DbResult<InterruptGuard<'_>> {
        self.throw_if_canceled()?;
        *self
            .inner
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        // cancel() may have run between the check and the store.
        if self.is_canceled() {
            self.detach();
            return Err(DbError::Canceled);
        }
        Ok(InterruptGuard { signal: self })
    }

    fn detach(&self) {
        self.inner
            .interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl std::fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

/// Keeps an interrupt handle attached to a signal.
pub(crate) struct InterruptGuard<'a> {
    signal: &'a CancellationSignal,
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.signal.detach();
    }
}

/// Attaches `handle` to `signal` if one was given.
pub(crate) fn attach_optional(
    signal: Option<&CancellationSignal>,
    handle: impl FnOnce() -> InterruptHandle,
) -> DbResult<Option<InterruptGuard<'_>>> {
    signal.map(|signal| signal.attach(handle())).transpose()
}
