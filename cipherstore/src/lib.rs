//! Versioned, optionally encrypted `SQLite` store handle with windowed cursors.
//!
//! The crate layers two subsystems over the engine (reached through
//! `rusqlite`):
//!
//! * **Lifecycle**: an [`OpenHelper`] opens or creates a keyed store, runs
//!   the schema-version state machine once (create, upgrade, downgrade or
//!   recreate below a minimum supported version) and hands out a shared
//!   [`Database`]. The database tracks nested transactions, switches
//!   write-ahead logging only while no transaction is open and notifies
//!   content observers when a write commits.
//! * **Cursors**: a [`Cursor`] walks a query result through a bounded
//!   [`CursorWindow`] of rows in a compact binary layout, refilling it when
//!   a move leaves the buffered range. Deactivated cursors, and cursors that
//!   track changes after a commit, are stale until requeried.
//!
//! Every failure is a [`DbError`] whose [`ErrorCategory`] tells state,
//! stale-data, bounds, store and cancellation failures apart.
//!
//! With the `sqlcipher` feature the engine is built with `SQLCipher` and
//! [`Credential`]s encrypt the store at rest.
//!
//! ```no_run
//! use cipherstore::{Credential, HelperConfig, LogSink, OpenHelper, OpenHooks};
//!
//! # fn main() -> cipherstore::DbResult<()> {
//! let hooks = OpenHooks::new()
//!     .on_create(|db| db.execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);"))
//!     .on_upgrade(|db, _from, _to| db.execute_batch("ALTER TABLE notes ADD COLUMN tag TEXT;"));
//! let helper = OpenHelper::new(
//!     HelperConfig::new(Some("notes.db".into()), 2)?,
//!     Credential::None,
//!     hooks,
//!     LogSink::facade(),
//! );
//! let db = helper.writable_database()?;
//! let mut cursor = db.query("SELECT body FROM notes ORDER BY id", &[])?;
//! while cursor.move_to_next()? {
//!     println!("{:?}", cursor.get_string(0)?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod logger;

pub mod error;
pub mod value;

pub mod config;

pub mod cipher;
pub mod connection;

pub mod cancel;
pub mod closable;
pub mod observer;
pub mod transaction;

pub mod window;
mod fill;
pub mod cursor;

pub mod database;
pub mod helper;
pub mod migration;

pub use cancel::CancellationSignal;
pub use cipher::{Credential, KeyHooks};
pub use closable::{RefCount, ReleaseHooks, Released};
pub use config::{DatabaseConfig, HelperConfig, JournalMode, OpenFlags, SyncMode};
pub use connection::{Connection, DatabasePath};
pub use cursor::{Cursor, CursorFactory, DefaultCursorFactory, QuerySpec};
pub use database::{Database, DatabaseOptions};
pub use error::{DbError, DbResult, ErrorCategory};
pub use helper::{OpenHelper, OpenHooks};
pub use logger::{LogLevel, LogSink, Logger};
pub use migration::Transition;
pub use observer::{ContentObserver, DataSetObserver, ObserverRegistry};
pub use transaction::TransactionMode;
pub use value::Value;
pub use window::{CursorWindow, FieldType, RowHandle};
