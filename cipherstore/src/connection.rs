//! Thin wrapper around one engine connection.
//!
//! Everything above this module talks to the engine through [`Connection`].
//! It owns exactly one `rusqlite::Connection` and knows nothing about
//! transactions nesting, cursors or schema versions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params_from_iter, InterruptHandle, OptionalExtension};

use crate::config::{DatabaseConfig, JournalMode, OpenFlags};
use crate::error::DbResult;
use crate::value::Value;

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabasePath {
    /// Private, process-local store that disappears on close.
    InMemory,
    /// Store file on disk.
    File(PathBuf),
}

impl DatabasePath {
    /// Returns the file path, or `None` for in-memory stores.
    #[must_use]
    pub fn file(&self) -> Option<&Path> {
        match self {
            Self::InMemory => None,
            Self::File(path) => Some(path),
        }
    }

    /// Returns `true` for in-memory stores.
    #[must_use]
    pub const fn is_in_memory(&self) -> bool {
        matches!(self, Self::InMemory)
    }
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => f.write_str(":memory:"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A single engine connection.
///
/// Closed when dropped. Not `Sync`; callers serialize access.
pub struct Connection {
    conn: rusqlite::Connection,
    read_only: bool,
}

impl Connection {
    /// Opens (or creates) the store at `path`.
    pub(crate) fn open(path: &DatabasePath, flags: OpenFlags) -> DbResult<Self> {
        let mut open_flags = if flags.read_only {
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if flags.create && !flags.read_only {
            open_flags |= rusqlite::OpenFlags::SQLITE_OPEN_CREATE;
        }
        open_flags |=
            rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX | rusqlite::OpenFlags::SQLITE_OPEN_URI;

        let conn = match path {
            DatabasePath::InMemory => rusqlite::Connection::open_in_memory_with_flags(open_flags)?,
            DatabasePath::File(file) => rusqlite::Connection::open_with_flags(file, open_flags)?,
        };
        Ok(Self {
            conn,
            read_only: flags.read_only,
        })
    }

    /// Applies the per-connection pragmas from `config`.
    ///
    /// The journal mode is only touched on writable, file-backed connections.
    pub(crate) fn configure(
        &self,
        path: &DatabasePath,
        config: &DatabaseConfig,
        write_ahead_logging: bool,
    ) -> DbResult<()> {
        self.conn
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        self.conn.execute_batch(&format!(
            "PRAGMA foreign_keys = {};
             PRAGMA secure_delete = {};
             PRAGMA synchronous = {};",
            on_off(config.foreign_keys),
            on_off(config.secure_delete),
            config.sync_mode.pragma_value(),
        ))?;
        if !self.read_only && !path.is_in_memory() {
            let mode = if write_ahead_logging {
                JournalMode::Wal
            } else {
                config.journal_mode
            };
            self.set_journal_mode(mode)?;
        }
        Ok(())
    }

    /// Executes one or more SQL statements separated by semicolons.
    ///
    /// No result rows are returned. Suitable for DDL, PRAGMAs, and
    /// multi-statement scripts.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Prepares and executes a single SQL statement with the given parameters.
    ///
    /// Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn execute(&self, sql: &str, params: &[Value]) -> DbResult<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(params_from_iter(params.iter()))?)
    }

    /// Runs `sql` and returns the first column of the first row.
    ///
    /// `Ok(None)` means the statement produced no row, which is distinct
    /// from an error.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn query_scalar(&self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let value = stmt
            .query_row(params_from_iter(params.iter()), |row| {
                Ok(Value::from_value_ref(row.get_ref(0)?))
            })
            .optional()?;
        Ok(value)
    }

    /// Returns the column names `sql` would produce, validating the SQL.
    pub(crate) fn column_names(&self, sql: &str) -> DbResult<Vec<String>> {
        let stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Returns the schema version stored in the engine's header.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn user_version(&self) -> DbResult<i64> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))?)
    }

    /// Persists the schema version.
    pub(crate) fn set_user_version(&self, version: i64) -> DbResult<()> {
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {version};"))?;
        Ok(())
    }

    /// Returns the current journal mode as reported by the engine.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn journal_mode(&self) -> DbResult<String> {
        Ok(self
            .conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))?)
    }

    /// Switches the journal mode and returns the mode the engine settled on.
    pub(crate) fn set_journal_mode(&self, mode: JournalMode) -> DbResult<String> {
        Ok(self.conn.query_row(
            &format!("PRAGMA journal_mode = {};", mode.pragma_value()),
            [],
            |row| row.get(0),
        )?)
    }

    /// Returns `true` if this connection was opened without write access.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Returns `true` when no engine-level transaction is open.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Returns the number of rows changed by the most recent statement.
    #[must_use]
    pub fn changes(&self) -> u64 {
        self.conn.changes()
    }

    /// Returns the rowid of the most recent successful INSERT.
    #[must_use]
    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    pub(crate) fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    pub(crate) const fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

const fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Connection {
    /// Opens an in-memory database.
    pub(crate) fn open_in_memory() -> DbResult<Self> {
        Self::open(&DatabasePath::InMemory, OpenFlags::READ_WRITE_CREATE)
    }
}
