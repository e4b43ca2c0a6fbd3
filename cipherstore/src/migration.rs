//! Schema-version state machine.
//!
//! Each open compares the version stored in the engine with the version the
//! application targets and runs exactly one [`Transition`]. Create, upgrade
//! and downgrade run inside one transaction together with the version
//! update, so a failing hook leaves the store at its previous version.

use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::helper::OpenHooks;

/// What an open has to do to bring the stored schema to the target version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The stored version already matches.
    None,
    /// A new store; the create hook builds the schema.
    Create,
    /// The stored version is below the minimum supported one. The store is
    /// deleted and created from scratch.
    Recreate {
        /// Version found in the store.
        from: i64,
    },
    /// The stored version is older than the target.
    Upgrade {
        /// Version found in the store.
        from: i64,
        /// Target version.
        to: i64,
    },
    /// The stored version is newer than the target.
    Downgrade {
        /// Version found in the store.
        from: i64,
        /// Target version.
        to: i64,
    },
}

impl Transition {
    /// Chooses the transition for `stored`, given the minimum supported and
    /// target versions.
    #[must_use]
    pub const fn plan(stored: i64, min_supported: i64, target: i64) -> Self {
        if stored == target {
            Self::None
        } else if stored > 0 && stored < min_supported {
            Self::Recreate { from: stored }
        } else if stored == 0 {
            Self::Create
        } else if stored > target {
            Self::Downgrade {
                from: stored,
                to: target,
            }
        } else {
            Self::Upgrade {
                from: stored,
                to: target,
            }
        }
    }

    /// Returns `true` if the stored schema has to change.
    #[must_use]
    pub const fn is_migration(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Runs a create, upgrade or downgrade and persists `target` in the same
/// transaction.
///
/// # Errors
///
/// Hook failures and [`DbError::DowngradeUnsupported`] roll the transaction
/// back. [`Transition::Recreate`] is rejected with
/// [`DbError::IllegalState`]; the caller deletes the store instead.
pub(crate) fn migrate(
    db: &Database,
    transition: Transition,
    target: i64,
    hooks: &OpenHooks,
) -> DbResult<()> {
    match transition {
        Transition::None => return Ok(()),
        Transition::Recreate { from } => {
            return Err(DbError::illegal_state(format!(
                "version {from} has to be recreated, not migrated"
            )));
        }
        Transition::Create | Transition::Upgrade { .. } | Transition::Downgrade { .. } => {}
    }
    db.log()
        .info(format_args!("{}: {transition:?} to version {target}", db.path()));
    db.run_in_transaction(|db| {
        match transition {
            Transition::Create => hooks.create(db)?,
            Transition::Upgrade { from, to } => hooks.upgrade(db, from, to)?,
            Transition::Downgrade { from, to } => hooks.downgrade(db, from, to)?,
            Transition::None | Transition::Recreate { .. } => {}
        }
        db.set_version(target)
    })
}
