//! Constructor-time configuration for databases and open helpers.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{DbError, DbResult};

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default initial window size: 2 MiB.
const DEFAULT_WINDOW_INITIAL_BYTES: usize = 2 * 1024 * 1024;
/// Default upper bound a window may grow to: 16 MiB.
const DEFAULT_WINDOW_MAX_BYTES: usize = 16 * 1024 * 1024;
/// Default number of read-only connections kept while WAL is enabled.
const DEFAULT_READ_POOL_SIZE: usize = 2;

/// Journal mode applied when a connection is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Rollback journal, deleted on commit.
    #[default]
    Delete,
    /// Write-ahead log.
    Wal,
}

impl JournalMode {
    /// Returns the `journal_mode` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Wal => "wal",
        }
    }
}

/// `synchronous` pragma setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SyncMode {
    /// Returns the `synchronous` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Per-connection tuning.
///
/// # Invariants
/// - `window_initial_bytes` and `window_max_bytes` are non-zero and
///   `window_initial_bytes <= window_max_bytes`.
/// - `read_pool_size` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Journal mode used when WAL is not requested through open flags.
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// `synchronous` pragma.
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Enforce foreign keys.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
    /// Overwrite deleted content with zeroes.
    #[serde(default = "default_true")]
    pub secure_delete: bool,
    /// Initial byte capacity of a cursor window.
    #[serde(default = "default_window_initial_bytes")]
    pub window_initial_bytes: usize,
    /// Capacity a cursor window may grow to before reporting it is full.
    #[serde(default = "default_window_max_bytes")]
    pub window_max_bytes: usize,
    /// Read-only connections used for queries while WAL is enabled.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

const fn default_true() -> bool {
    true
}

const fn default_window_initial_bytes() -> usize {
    DEFAULT_WINDOW_INITIAL_BYTES
}

const fn default_window_max_bytes() -> usize {
    DEFAULT_WINDOW_MAX_BYTES
}

const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            foreign_keys: true,
            secure_delete: true,
            window_initial_bytes: DEFAULT_WINDOW_INITIAL_BYTES,
            window_max_bytes: DEFAULT_WINDOW_MAX_BYTES,
            read_pool_size: DEFAULT_READ_POOL_SIZE,
        }
    }
}

impl DatabaseConfig {
    /// Returns a copy with a fixed window size (initial == max).
    #[must_use]
    pub const fn with_window_bytes(mut self, bytes: usize) -> Self {
        self.window_initial_bytes = bytes;
        self.window_max_bytes = bytes;
        self
    }

    /// Validates the configured limits.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfig`] when a limit is out of range.
    pub fn validate(&self) -> DbResult<()> {
        if self.window_initial_bytes == 0 || self.window_max_bytes == 0 {
            return Err(DbError::InvalidConfig(
                "window sizes must be greater than zero".to_string(),
            ));
        }
        if self.window_initial_bytes > self.window_max_bytes {
            return Err(DbError::InvalidConfig(format!(
                "window_initial_bytes {} exceeds window_max_bytes {}",
                self.window_initial_bytes, self.window_max_bytes
            )));
        }
        if u32::try_from(self.window_max_bytes).is_err() {
            return Err(DbError::InvalidConfig(format!(
                "window_max_bytes {} exceeds the 32-bit window address space",
                self.window_max_bytes
            )));
        }
        if self.read_pool_size == 0 {
            return Err(DbError::InvalidConfig(
                "read_pool_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open without write access.
    pub read_only: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Switch the journal to write-ahead logging after opening.
    pub write_ahead_logging: bool,
}

impl OpenFlags {
    /// Read-write, creating the file if necessary.
    pub const READ_WRITE_CREATE: Self = Self {
        read_only: false,
        create: true,
        write_ahead_logging: false,
    };

    /// Read-only; the file must exist.
    pub const READ_ONLY: Self = Self {
        read_only: true,
        create: false,
        write_ahead_logging: false,
    };

    /// Returns a copy with write-ahead logging requested.
    #[must_use]
    pub const fn with_write_ahead_logging(mut self, enabled: bool) -> Self {
        self.write_ahead_logging = enabled;
        self
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self::READ_WRITE_CREATE
    }
}

/// Configuration for an [`OpenHelper`](crate::OpenHelper).
///
/// # Invariants
/// - `target_version >= 1`.
/// - `min_supported_version` is never negative after [`HelperConfig::new`].
#[derive(Debug, Clone)]
pub struct HelperConfig {
    /// Store file path; `None` opens a private in-memory store.
    pub name: Option<PathBuf>,
    /// Schema version the application expects.
    pub target_version: i64,
    /// Stored versions below this (and above zero) are discarded and recreated.
    pub min_supported_version: i64,
    /// Whether write-ahead logging is applied at the next open.
    pub write_ahead_logging: bool,
    /// Per-connection tuning.
    pub database: DatabaseConfig,
}

impl HelperConfig {
    /// Creates a configuration for the store at `name` with the given target version.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidConfig`] if `target_version < 1`.
    pub fn new(name: Option<PathBuf>, target_version: i64) -> DbResult<Self> {
        if target_version < 1 {
            return Err(DbError::InvalidConfig(format!(
                "version must be >= 1, was {target_version}"
            )));
        }
        Ok(Self {
            name,
            target_version,
            min_supported_version: 0,
            write_ahead_logging: false,
            database: DatabaseConfig::default(),
        })
    }

    /// Sets the minimum supported version (negative values are clamped to zero).
    #[must_use]
    pub fn with_min_supported_version(mut self, version: i64) -> Self {
        self.min_supported_version = version.max(0);
        self
    }

    /// Requests write-ahead logging at open time.
    #[must_use]
    pub const fn with_write_ahead_logging(mut self, enabled: bool) -> Self {
        self.write_ahead_logging = enabled;
        self
    }

    /// Replaces the per-connection configuration.
    #[must_use]
    pub fn with_database_config(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }
}
