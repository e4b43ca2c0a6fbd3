//! Error types for the store handle, cursors and windows.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Result type for every fallible operation in this crate.
pub type DbResult<T> = Result<T, DbError>;

/// Coarse failure class, so callers can branch without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The operation is not valid in the object's current lifecycle state.
    State,
    /// A read hit a deactivated or invalidated cursor. Recover with `requery`.
    StaleData,
    /// A row or column index is outside the valid range. Recover by repositioning.
    Bounds,
    /// The underlying store reported a failure (key, corruption, I/O, schema).
    Store,
    /// The operation was canceled through a `CancellationSignal`.
    Canceled,
}

/// Errors raised by the store handle, cursors and windows.
#[derive(Debug, Error)]
pub enum DbError {
    /// Operation invalid in the current lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The object was already closed.
    #[error("attempt to use an already-closed object: {0}")]
    Closed(String),

    /// A handle was requested while the same helper was still opening one.
    #[error("database handle requested recursively during initialization")]
    RecursiveInitialization,

    /// A read was attempted on a deactivated or invalidated cursor.
    #[error("stale data: {0}")]
    StaleData(String),

    /// The cursor position is outside `[0, count)`.
    #[error("index {index} requested, with a size of {count}")]
    OutOfBounds {
        /// Position that was requested.
        index: i64,
        /// Number of rows in the result set.
        count: usize,
    },

    /// A column index is outside the result set's columns.
    #[error("column {column} requested, with {count} columns")]
    ColumnOutOfBounds {
        /// Column that was requested.
        column: usize,
        /// Number of columns available.
        count: usize,
    },

    /// No column with the given name exists in the result set.
    #[error("column '{0}' does not exist")]
    NoSuchColumn(String),

    /// A cell could not be read as the requested type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The file is not a database or the key is wrong.
    #[error("file is not a database or the key is incorrect: {0}")]
    NotADatabase(String),

    /// The database image is malformed.
    #[error("database corrupt: {0}")]
    Corrupt(String),

    /// The stored schema is newer than the target and no downgrade hook is set.
    #[error("can't downgrade database from version {from} to {to}")]
    DowngradeUnsupported {
        /// Version found in the store.
        from: i64,
        /// Version the helper was configured for.
        to: i64,
    },

    /// A read-only handle needs a schema migration.
    #[error("can't migrate read-only database from version {from} to {to}")]
    ReadOnlyMigration {
        /// Version found in the store.
        from: i64,
        /// Version the helper was configured for.
        to: i64,
    },

    /// A credential was supplied but the engine was built without a cipher.
    #[error("cipher support is not available in this build")]
    CipherUnavailable,

    /// Constructor-time configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single row does not fit into an empty window.
    #[error("window allocation failed: {0}")]
    WindowAllocation(String),

    /// The operation was canceled.
    #[error("operation canceled")]
    Canceled,

    /// Filesystem failure outside the engine (for example deleting a store).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other engine failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),
}

impl DbError {
    /// Returns the failure class of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::IllegalState(_) | Self::Closed(_) | Self::RecursiveInitialization => {
                ErrorCategory::State
            }
            Self::StaleData(_) => ErrorCategory::StaleData,
            Self::OutOfBounds { .. } | Self::ColumnOutOfBounds { .. } | Self::NoSuchColumn(_) => {
                ErrorCategory::Bounds
            }
            Self::Canceled => ErrorCategory::Canceled,
            Self::TypeMismatch(_)
            | Self::NotADatabase(_)
            | Self::Corrupt(_)
            | Self::DowngradeUnsupported { .. }
            | Self::ReadOnlyMigration { .. }
            | Self::CipherUnavailable
            | Self::InvalidConfig(_)
            | Self::WindowAllocation(_)
            | Self::Io(_)
            | Self::Sqlite(_) => ErrorCategory::Store,
        }
    }

    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub(crate) fn closed(what: impl Into<String>) -> Self {
        Self::Closed(what.into())
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        let code = err.sqlite_error_code();
        match code {
            Some(ErrorCode::NotADatabase) => Self::NotADatabase(err.to_string()),
            Some(ErrorCode::DatabaseCorrupt) => Self::Corrupt(err.to_string()),
            Some(ErrorCode::OperationInterrupted) => Self::Canceled,
            _ => Self::Sqlite(err),
        }
    }
}
