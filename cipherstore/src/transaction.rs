//! Nested transaction bookkeeping.
//!
//! Only the outermost scope talks to the engine. Inner scopes are frames on
//! a stack; ending one folds its outcome into its parent. The outermost
//! `end` commits only if every scope marked itself successful.

use crate::error::{DbError, DbResult};

/// How the outermost transaction acquires its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// Locks are taken on first access.
    Deferred,
    /// A write lock is taken immediately.
    Immediate,
    /// An exclusive lock is taken immediately.
    #[default]
    Exclusive,
}

impl TransactionMode {
    /// Statement that opens a transaction in this mode.
    #[must_use]
    pub const fn begin_sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED;",
            Self::Immediate => "BEGIN IMMEDIATE;",
            Self::Exclusive => "BEGIN EXCLUSIVE;",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    mode: TransactionMode,
    marked_successful: bool,
    child_failed: bool,
}

/// What the caller has to do with the engine after [`TransactionStack::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EndAction {
    /// An inner scope ended; nothing to send to the engine.
    Nested,
    /// The outermost scope ended successfully.
    Commit,
    /// The outermost scope ended and something failed.
    Rollback,
}

/// Stack of open transaction scopes on one connection.
#[derive(Debug, Default)]
pub(crate) struct TransactionStack {
    frames: Vec<Frame>,
}

impl TransactionStack {
    /// Pushes a scope. Returns `true` when it is the outermost one and the
    /// caller must issue `mode.begin_sql()`.
    pub(crate) fn begin(&mut self, mode: TransactionMode) -> DbResult<bool> {
        if self.frames.last().is_some_and(|top| top.marked_successful) {
            return Err(DbError::illegal_state(
                "cannot begin a transaction after the current one was marked successful; \
                 the only thing you can do now is end it",
            ));
        }
        let outermost = self.frames.is_empty();
        self.frames.push(Frame {
            mode,
            marked_successful: false,
            child_failed: false,
        });
        Ok(outermost)
    }

    /// Pops a scope whose `BEGIN` failed at the engine.
    pub(crate) fn abort_begin(&mut self) {
        self.frames.pop();
    }

    /// Marks the innermost scope successful.
    pub(crate) fn mark_successful(&mut self) -> DbResult<()> {
        let top = self
            .frames
            .last_mut()
            .ok_or_else(|| DbError::illegal_state("no transaction is in progress"))?;
        if top.marked_successful {
            return Err(DbError::illegal_state(
                "the transaction has already been marked successful",
            ));
        }
        top.marked_successful = true;
        Ok(())
    }

    /// Pops the innermost scope.
    ///
    /// `yielding` treats an unmarked outermost scope as successful, which is
    /// how [`yield_if_contended`](crate::Database::yield_if_contended)
    /// commits the work done so far.
    pub(crate) fn end(&mut self, yielding: bool) -> DbResult<EndAction> {
        let top = self
            .frames
            .pop()
            .ok_or_else(|| DbError::illegal_state("no transaction is in progress"))?;
        let successful = (top.marked_successful || yielding) && !top.child_failed;
        match self.frames.last_mut() {
            Some(parent) => {
                if !successful {
                    parent.child_failed = true;
                }
                Ok(EndAction::Nested)
            }
            None if successful => Ok(EndAction::Commit),
            None => Ok(EndAction::Rollback),
        }
    }

    /// Validates that the current transaction may be yielded and returns the
    /// mode to reopen it with.
    pub(crate) fn check_yield(&self) -> DbResult<Option<TransactionMode>> {
        match self.frames.as_slice() {
            [] => Ok(None),
            [only] if only.marked_successful => Err(DbError::illegal_state(
                "the transaction has already been marked successful",
            )),
            [only] => Ok(Some(only.mode)),
            _ => Err(DbError::illegal_state(
                "cannot yield a nested transaction",
            )),
        }
    }

    /// Drops every scope after the engine rolled back underneath us.
    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    pub(crate) const fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) const fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }
}
