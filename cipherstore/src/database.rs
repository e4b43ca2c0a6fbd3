//! Shared handle to one open store.
//!
//! A [`Database`] owns the primary connection and is shared across threads
//! by cloning. The primary connection, the transaction stack, the WAL flag
//! and the owning thread of the current transaction live behind one mutex.
//! A thread that begins a transaction owns the connection until the
//! outermost scope ends; other threads wait for it, unless WAL is enabled
//! and they only read, in which case they use a pooled read-only
//! connection and never wait for the writer.
//!
//! Every public operation holds a reference on the handle for its
//! duration, so [`Database::close`] tears the connection down only after
//! in-flight operations finish.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::cancel::CancellationSignal;
use crate::cipher::{self, Credential, KeyHooks};
use crate::closable::{RefCount, ReleaseHooks};
use crate::config::{DatabaseConfig, JournalMode, OpenFlags};
use crate::connection::{Connection, DatabasePath};
use crate::cursor::{Cursor, CursorFactory, DefaultCursorFactory, QuerySpec};
use crate::error::{DbError, DbResult};
use crate::fill::{self, FillResult};
use crate::logger::LogSink;
use crate::observer::{notify_content_changed, ContentObserver, ObserverRegistry};
use crate::transaction::{EndAction, TransactionMode, TransactionStack};
use crate::value::Value;
use crate::window::CursorWindow;

/// How long a waiter sleeps before re-checking its cancellation signal.
const WAIT_SLICE: Duration = Duration::from_millis(25);
/// Upper bound on how long a yielding transaction waits for a contender.
const YIELD_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);

/// Companion files the engine may create next to a store.
const COMPANION_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// Everything needed to open a [`Database`] besides its path and flags.
pub struct DatabaseOptions {
    /// Per-connection tuning.
    pub config: DatabaseConfig,
    /// Key for encrypted stores.
    pub credential: Arc<Credential>,
    /// Callbacks around keying.
    pub key_hooks: KeyHooks,
    /// Where diagnostics go.
    pub log: LogSink,
    /// Builds cursors for [`Database::query`]; `None` uses [`DefaultCursorFactory`].
    pub cursor_factory: Option<Arc<dyn CursorFactory>>,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            config: DatabaseConfig::default(),
            credential: Arc::new(Credential::None),
            key_hooks: KeyHooks::default(),
            log: LogSink::default(),
            cursor_factory: None,
        }
    }
}

struct ConnectionState {
    conn: Option<Connection>,
    read_only: bool,
    wal: bool,
    transactions: TransactionStack,
    owner: Option<ThreadId>,
    waiters: usize,
    pending_change: bool,
}

impl ConnectionState {
    fn connection(&self) -> DbResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DbError::closed("database"))
    }

    fn owned_by_current_thread(&self) -> bool {
        self.owner == Some(thread::current().id())
    }

    /// Records a write. Returns `true` if observers should hear about it now.
    const fn note_change(&mut self) -> bool {
        if self.transactions.is_active() {
            self.pending_change = true;
            false
        } else {
            true
        }
    }
}

struct DatabaseInner {
    path: DatabasePath,
    config: DatabaseConfig,
    credential: Mutex<Arc<Credential>>,
    key_hooks: KeyHooks,
    log: LogSink,
    refs: RefCount,
    owner_released: AtomicBool,
    state: Mutex<ConnectionState>,
    available: Condvar,
    readers: Mutex<Vec<Connection>>,
    content_observers: Mutex<ObserverRegistry<dyn ContentObserver>>,
    cursor_factory: Arc<dyn CursorFactory>,
}

impl DatabaseInner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn credential(&self) -> Arc<Credential> {
        Arc::clone(&self.credential.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_readers(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown(&self, reason: &str) {
        {
            let mut state = self.lock_state();
            if state.transactions.is_active() {
                self.log.warn(format_args!(
                    "closing {} with a transaction in progress; it is rolled back",
                    self.path
                ));
            }
            state.conn = None;
            state.transactions.clear();
            state.owner = None;
            state.pending_change = false;
        }
        self.available.notify_all();
        self.lock_readers().clear();
        self.log.debug(format_args!("{} {reason}", self.path));
    }
}

impl ReleaseHooks for DatabaseInner {
    fn on_all_references_released(&self) {
        self.shutdown("closed");
    }

    fn on_all_references_released_from_container(&self) {
        self.shutdown("closed by its open helper");
    }
}

/// Reference held for the duration of one operation.
struct OperationRef<'a> {
    inner: &'a DatabaseInner,
}

impl Drop for OperationRef<'_> {
    fn drop(&mut self) {
        self.inner.refs.release(self.inner);
    }
}

/// Shared handle to an open store.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

/// Opens a connection, keys it and applies the configured pragmas.
fn open_connection(
    path: &DatabasePath,
    flags: OpenFlags,
    config: &DatabaseConfig,
    credential: &Credential,
    key_hooks: &KeyHooks,
    wal: bool,
) -> DbResult<Connection> {
    let conn = Connection::open(path, flags)?;
    cipher::apply_key(&conn, credential, key_hooks)?;
    conn.configure(path, config, wal)?;
    Ok(conn)
}

impl Database {
    /// Opens (or creates) the store at `path`.
    ///
    /// The open sequence is open, pre-key hook, key, post-key hook, verify,
    /// configure.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidConfig`] for a rejected configuration,
    /// [`DbError::NotADatabase`] for a wrong key or a foreign file,
    /// [`DbError::CipherUnavailable`] for a credential on a plain build, and
    /// any other engine failure.
    pub fn open(path: DatabasePath, flags: OpenFlags, options: DatabaseOptions) -> DbResult<Self> {
        options.config.validate()?;
        let wal = !flags.read_only
            && !path.is_in_memory()
            && (flags.write_ahead_logging || options.config.journal_mode == JournalMode::Wal);
        let conn = open_connection(
            &path,
            flags,
            &options.config,
            &options.credential,
            &options.key_hooks,
            wal,
        )
        .inspect_err(|err| {
            options
                .log
                .error(format_args!("failed to open {path}: {err}"));
        })?;
        if flags.read_only {
            options.log.warn(format_args!("opened {path} read-only"));
        } else {
            options.log.debug(format_args!("opened {path}"));
        }
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                path,
                config: options.config,
                credential: Mutex::new(options.credential),
                key_hooks: options.key_hooks,
                log: options.log,
                refs: RefCount::new(),
                owner_released: AtomicBool::new(false),
                state: Mutex::new(ConnectionState {
                    conn: Some(conn),
                    read_only: flags.read_only,
                    wal,
                    transactions: TransactionStack::default(),
                    owner: None,
                    waiters: 0,
                    pending_change: false,
                }),
                available: Condvar::new(),
                readers: Mutex::new(Vec::new()),
                content_observers: Mutex::new(ObserverRegistry::new()),
                cursor_factory: options
                    .cursor_factory
                    .unwrap_or_else(|| Arc::new(DefaultCursorFactory)),
            }),
        })
    }

    /// Opens a private in-memory store with default options.
    ///
    /// # Errors
    ///
    /// Propagates engine failures.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(
            DatabasePath::InMemory,
            OpenFlags::READ_WRITE_CREATE,
            DatabaseOptions::default(),
        )
    }

    /// Deletes the store at `path` and its journal, WAL and shared-memory
    /// companions. Returns `true` if the main file existed.
    ///
    /// # Errors
    ///
    /// [`DbError::Io`] if a file exists but cannot be removed.
    pub fn delete_database(path: &Path) -> DbResult<bool> {
        let deleted = remove_if_exists(path)?;
        for suffix in COMPANION_SUFFIXES {
            let mut companion = path.as_os_str().to_owned();
            companion.push(suffix);
            remove_if_exists(&PathBuf::from(companion))?;
        }
        Ok(deleted)
    }

    fn acquire_operation(&self) -> DbResult<OperationRef<'_>> {
        self.inner.refs.acquire("database")?;
        Ok(OperationRef { inner: &self.inner })
    }

    /// Locks the primary connection, waiting while another thread owns it
    /// through a transaction.
    fn lock_connection(
        &self,
        signal: Option<&CancellationSignal>,
    ) -> DbResult<MutexGuard<'_, ConnectionState>> {
        let current = thread::current().id();
        let mut state = self.inner.lock_state();
        loop {
            state.connection()?;
            match state.owner {
                Some(owner) if owner != current => {}
                _ => return Ok(state),
            }
            if let Some(signal) = signal {
                signal.throw_if_canceled()?;
            }
            state.waiters += 1;
            let (guard, _) = self
                .inner
                .available
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            state.waiters -= 1;
        }
    }

    /// Runs `f` on a connection suitable for reading.
    ///
    /// With WAL enabled and no transaction owned by this thread, a pooled
    /// read-only connection is used so the writer is not waited for.
    fn with_read_connection<T>(
        &self,
        signal: Option<&CancellationSignal>,
        f: impl FnOnce(&Connection) -> DbResult<T>,
    ) -> DbResult<T> {
        let use_pool = {
            let state = self.inner.lock_state();
            state.connection()?;
            state.wal && !state.owned_by_current_thread()
        };
        if !use_pool {
            let state = self.lock_connection(signal)?;
            return f(state.connection()?);
        }
        let reader = self.take_reader()?;
        let result = f(&reader);
        self.return_reader(reader);
        result
    }

    fn take_reader(&self) -> DbResult<Connection> {
        let pooled = self.inner.lock_readers().pop();
        if let Some(reader) = pooled {
            return Ok(reader);
        }
        let credential = self.inner.credential();
        self.inner.log.debug(format_args!(
            "opening read connection to {}",
            self.inner.path
        ));
        open_connection(
            &self.inner.path,
            OpenFlags::READ_ONLY,
            &self.inner.config,
            &credential,
            &self.inner.key_hooks,
            false,
        )
    }

    fn return_reader(&self, reader: Connection) {
        if !self.inner.lock_state().wal {
            return;
        }
        let mut readers = self.inner.lock_readers();
        if readers.len() < self.inner.config.read_pool_size {
            readers.push(reader);
        }
    }

    fn drain_readers(&self) {
        let drained = std::mem::take(&mut *self.inner.lock_readers());
        drop(drained);
    }

    fn lock_content_observers(&self) -> MutexGuard<'_, ObserverRegistry<dyn ContentObserver>> {
        self.inner
            .content_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_content_changed(&self) {
        let observers = self.lock_content_observers().snapshot();
        notify_content_changed(&observers, false);
    }

    /// Runs a write on the primary connection and notifies observers
    /// (now, or at commit when a transaction is open).
    fn write<T>(
        &self,
        f: impl FnOnce(&Connection) -> DbResult<T>,
        changed: impl FnOnce(&T, &Connection) -> bool,
    ) -> DbResult<T> {
        let _op = self.acquire_operation()?;
        let mut state = self.lock_connection(None)?;
        let conn = state.connection()?;
        let value = f(conn)?;
        let notify = changed(&value, conn) && state.note_change();
        drop(state);
        if notify {
            self.notify_content_changed();
        }
        Ok(value)
    }

    /// Executes a single statement and returns the number of changed rows.
    ///
    /// Statements that return rows are rejected by the engine; use
    /// [`Database::query`] or [`Database::query_scalar`] for those.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and [`DbError::Closed`].
    pub fn execute(&self, sql: &str, args: &[Value]) -> DbResult<usize> {
        self.write(|conn| conn.execute(sql, args), |changed, _| *changed > 0)
    }

    /// Executes an INSERT and returns the new row id.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and [`DbError::Closed`].
    pub fn execute_insert(&self, sql: &str, args: &[Value]) -> DbResult<i64> {
        self.write(
            |conn| {
                conn.execute(sql, args)?;
                Ok(conn.last_insert_rowid())
            },
            |_, conn| conn.changes() > 0,
        )
    }

    /// Executes a semicolon-separated script.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and [`DbError::Closed`].
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.write(|conn| conn.execute_batch(sql), |(), _| true)
    }

    /// Returns the first column of the first row, or `None` if there is no row.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and [`DbError::Closed`].
    pub fn query_scalar(&self, sql: &str, args: &[Value]) -> DbResult<Option<Value>> {
        let _op = self.acquire_operation()?;
        let state = self.lock_connection(None)?;
        state.connection()?.query_scalar(sql, args)
    }

    /// Prepares `sql` and returns an unfilled cursor over its result.
    ///
    /// # Errors
    ///
    /// Propagates engine failures (including SQL errors) and
    /// [`DbError::Closed`].
    pub fn query(&self, sql: &str, args: &[Value]) -> DbResult<Cursor> {
        self.query_with_factory(
            self.inner.cursor_factory.as_ref(),
            QuerySpec::new(sql, args.to_vec()),
        )
    }

    /// Like [`Database::query`], with a signal that cancels the query and
    /// every later fill of the returned cursor.
    ///
    /// # Errors
    ///
    /// [`DbError::Canceled`] if the signal fired, otherwise as [`Database::query`].
    pub fn query_with_cancel(
        &self,
        sql: &str,
        args: &[Value],
        signal: CancellationSignal,
    ) -> DbResult<Cursor> {
        self.query_with_factory(
            self.inner.cursor_factory.as_ref(),
            QuerySpec::new(sql, args.to_vec()).with_cancellation(signal),
        )
    }

    /// Runs `query` through `factory` instead of the configured one.
    ///
    /// # Errors
    ///
    /// As [`Database::query_with_cancel`], plus factory failures.
    pub fn query_with_factory(
        &self,
        factory: &dyn CursorFactory,
        query: QuerySpec,
    ) -> DbResult<Cursor> {
        let _op = self.acquire_operation()?;
        let signal = query.cancellation.as_ref();
        if let Some(signal) = signal {
            signal.throw_if_canceled()?;
        }
        let columns = self.with_read_connection(signal, |conn| conn.column_names(&query.sql))?;
        factory.new_cursor(self, query, columns)
    }

    /// Fills `window` for a cursor.
    pub(crate) fn fill_window(
        &self,
        query: &QuerySpec,
        window: &mut CursorWindow,
        start: usize,
        required: usize,
        count_all: bool,
    ) -> DbResult<FillResult> {
        let _op = self.acquire_operation()?;
        let signal = query.cancellation.as_ref();
        if let Some(signal) = signal {
            signal.throw_if_canceled()?;
        }
        self.with_read_connection(signal, |conn| {
            fill::fill_window(
                conn,
                query,
                window,
                start,
                required,
                count_all,
                &self.inner.log,
            )
        })
    }

    /// Schema version stored in the engine.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and [`DbError::Closed`].
    pub fn version(&self) -> DbResult<i64> {
        let _op = self.acquire_operation()?;
        let state = self.lock_connection(None)?;
        state.connection()?.user_version()
    }

    /// Persists the schema version. Only migration calls this, inside its
    /// transaction.
    pub(crate) fn set_version(&self, version: i64) -> DbResult<()> {
        let _op = self.acquire_operation()?;
        let state = self.lock_connection(None)?;
        state.connection()?.set_user_version(version)
    }

    /// Begins an exclusive transaction, or a nested scope inside the
    /// current one.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if the current scope was already marked
    /// successful; engine failures.
    pub fn begin_transaction(&self) -> DbResult<()> {
        self.begin_transaction_with_mode(TransactionMode::Exclusive, None)
    }

    /// Begins an immediate transaction, or a nested scope.
    ///
    /// # Errors
    ///
    /// As [`Database::begin_transaction`].
    pub fn begin_transaction_non_exclusive(&self) -> DbResult<()> {
        self.begin_transaction_with_mode(TransactionMode::Immediate, None)
    }

    /// Begins a transaction in `mode`. The mode of nested scopes is ignored.
    ///
    /// While another thread owns a transaction this blocks; `signal`
    /// abandons the wait.
    ///
    /// # Errors
    ///
    /// [`DbError::Canceled`] if the wait was abandoned, otherwise as
    /// [`Database::begin_transaction`].
    pub fn begin_transaction_with_mode(
        &self,
        mode: TransactionMode,
        signal: Option<&CancellationSignal>,
    ) -> DbResult<()> {
        let _op = self.acquire_operation()?;
        let mut state = self.lock_connection(signal)?;
        if state.transactions.begin(mode)? {
            let begun = state.connection()?.execute_batch(mode.begin_sql());
            if let Err(err) = begun {
                state.transactions.abort_begin();
                return Err(err);
            }
            state.owner = Some(thread::current().id());
        }
        let depth = state.transactions.depth();
        drop(state);
        self.inner.log.debug(format_args!(
            "begin transaction ({mode:?}), depth {depth}"
        ));
        Ok(())
    }

    /// Locks the state of a transaction owned by the calling thread.
    fn lock_owned(&self) -> DbResult<MutexGuard<'_, ConnectionState>> {
        let state = self.inner.lock_state();
        state.connection()?;
        if !state.owned_by_current_thread() {
            return Err(DbError::illegal_state(
                "no transaction is in progress on this thread",
            ));
        }
        Ok(state)
    }

    /// Marks the innermost scope successful.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] with no transaction on this thread or when
    /// the scope was already marked.
    pub fn set_transaction_successful(&self) -> DbResult<()> {
        let _op = self.acquire_operation()?;
        self.lock_owned()?.transactions.mark_successful()
    }

    /// Ends the innermost scope. The outermost scope commits if every scope
    /// was marked successful and rolls back otherwise.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] with no transaction on this thread; engine
    /// failures from `COMMIT`/`ROLLBACK`.
    pub fn end_transaction(&self) -> DbResult<()> {
        let _op = self.acquire_operation()?;
        let mut state = self.lock_owned()?;
        let action = state.transactions.end(false)?;
        let notify = self.finish_transaction(&mut state, action);
        drop(state);
        if notify? {
            self.notify_content_changed();
        }
        Ok(())
    }

    /// Sends the outcome of an ended scope to the engine. Returns whether a
    /// committed change should be announced.
    fn finish_transaction(&self, state: &mut ConnectionState, action: EndAction) -> DbResult<bool> {
        let sql = match action {
            EndAction::Nested => {
                self.inner.log.debug(format_args!(
                    "end nested transaction, depth {}",
                    state.transactions.depth()
                ));
                return Ok(false);
            }
            EndAction::Commit => "COMMIT;",
            EndAction::Rollback => "ROLLBACK;",
        };
        let result = state.connection()?.execute_batch(sql);
        if result.is_err() && action == EndAction::Commit {
            // The engine keeps a failed COMMIT open; undo it.
            if let Err(err) = state.connection()?.execute_batch("ROLLBACK;") {
                self.inner.log.warn(format_args!(
                    "rollback after a failed commit on {} failed: {err}",
                    self.inner.path
                ));
            }
        }
        let notify = action == EndAction::Commit && result.is_ok() && state.pending_change;
        state.pending_change = false;
        state.owner = None;
        self.inner.available.notify_all();
        self.inner.log.debug(format_args!("end transaction: {sql}"));
        result.map(|()| notify)
    }

    /// Runs `f` in a transaction that commits if `f` succeeds.
    ///
    /// # Errors
    ///
    /// The error of `f`, or of beginning or ending the transaction.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce(&Self) -> DbResult<T>) -> DbResult<T> {
        self.begin_transaction()?;
        let result = f(self).and_then(|value| self.set_transaction_successful().map(|()| value));
        let ended = self.end_transaction();
        let value = result?;
        ended?;
        Ok(value)
    }

    /// Returns `true` if the calling thread has a transaction open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        let state = self.inner.lock_state();
        state.owned_by_current_thread() && state.transactions.is_active()
    }

    /// Nesting depth of the calling thread's transaction (0 if none).
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        let state = self.inner.lock_state();
        if state.owned_by_current_thread() {
            state.transactions.depth()
        } else {
            0
        }
    }

    /// If other threads are waiting for the connection, commits the current
    /// transaction, lets them run and begins a new one in the same mode.
    ///
    /// Changes made by the threads that ran are visible afterwards. Returns
    /// `true` if the transaction was yielded.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] inside a nested scope or after the
    /// transaction was marked successful; engine failures.
    pub fn yield_if_contended(&self, sleep_after: Option<Duration>) -> DbResult<bool> {
        let _op = self.acquire_operation()?;
        let mut state = self.inner.lock_state();
        if !state.owned_by_current_thread() {
            return Ok(false);
        }
        let Some(mode) = state.transactions.check_yield()? else {
            return Ok(false);
        };
        let contenders = state.waiters;
        if contenders == 0 {
            return Ok(false);
        }
        let action = state.transactions.end(true)?;
        let notify = self.finish_transaction(&mut state, action);
        drop(state);
        if notify? {
            self.notify_content_changed();
        }
        self.inner.log.debug(format_args!(
            "yielded transaction to {contenders} waiter(s)"
        ));
        self.wait_for_handoff(contenders);
        if let Some(duration) = sleep_after {
            thread::sleep(duration);
        }
        self.begin_transaction_with_mode(mode, None)?;
        Ok(true)
    }

    /// Waits until at least one of `contenders` waiters woke up or a new
    /// owner took the connection.
    fn wait_for_handoff(&self, contenders: usize) {
        let deadline = Instant::now() + YIELD_HANDOFF_TIMEOUT;
        let mut state = self.inner.lock_state();
        while state.waiters >= contenders && state.owner.is_none() && Instant::now() < deadline {
            let (guard, _) = self
                .inner
                .available
                .wait_timeout(state, WAIT_SLICE)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        drop(state);
    }

    /// Switches to write-ahead logging.
    ///
    /// Returns `false` for in-memory and read-only stores, and when the
    /// engine refuses the mode.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] while any transaction is in progress.
    pub fn enable_write_ahead_logging(&self) -> DbResult<bool> {
        self.set_write_ahead_logging(true)
    }

    /// Switches back to the configured rollback journal.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] while any transaction is in progress.
    pub fn disable_write_ahead_logging(&self) -> DbResult<()> {
        self.set_write_ahead_logging(false).map(|_| ())
    }

    fn set_write_ahead_logging(&self, enabled: bool) -> DbResult<bool> {
        let _op = self.acquire_operation()?;
        let mut state = self.inner.lock_state();
        state.connection()?;
        if state.transactions.is_active() {
            return Err(DbError::illegal_state(
                "write-ahead logging cannot be toggled while a transaction is in progress",
            ));
        }
        if state.read_only || self.inner.path.is_in_memory() {
            return Ok(false);
        }
        if state.wal == enabled {
            return Ok(true);
        }
        let mode = if enabled {
            JournalMode::Wal
        } else {
            match self.inner.config.journal_mode {
                JournalMode::Wal | JournalMode::Delete => JournalMode::Delete,
            }
        };
        if !enabled {
            // Leaving WAL needs every other connection to be closed.
            self.drain_readers();
        }
        let applied = state.connection()?.set_journal_mode(mode)?;
        let switched = applied.eq_ignore_ascii_case(mode.pragma_value());
        if switched {
            state.wal = enabled;
        }
        drop(state);
        if !switched {
            self.inner.log.warn(format_args!(
                "could not change journal mode of {} to {}; it is {applied}",
                self.inner.path,
                mode.pragma_value()
            ));
        }
        Ok(switched)
    }

    /// Returns `true` while write-ahead logging is on.
    #[must_use]
    pub fn is_write_ahead_logging_enabled(&self) -> bool {
        self.inner.lock_state().wal
    }

    /// Re-keys the store with `credential`.
    ///
    /// # Errors
    ///
    /// [`DbError::CipherUnavailable`] on a build without a cipher;
    /// [`DbError::IllegalState`] inside a transaction; engine failures.
    pub fn change_password(&self, credential: Credential) -> DbResult<()> {
        let _op = self.acquire_operation()?;
        let state = self.lock_connection(None)?;
        if state.transactions.is_active() {
            return Err(DbError::illegal_state(
                "the key cannot be changed while a transaction is in progress",
            ));
        }
        cipher::rekey(state.connection()?, &credential)?;
        drop(state);
        *self.inner.credential.lock().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(credential);
        self.drain_readers();
        self.inner
            .log
            .info(format_args!("changed the key of {}", self.inner.path));
        Ok(())
    }

    /// Runs `PRAGMA integrity_check`.
    ///
    /// # Errors
    ///
    /// Propagates engine failures and [`DbError::Closed`].
    pub fn integrity_check(&self) -> DbResult<bool> {
        let _op = self.acquire_operation()?;
        let state = self.lock_connection(None)?;
        cipher::integrity_check(state.connection()?)
    }

    /// Replaces a read-only primary connection with a read-write one.
    pub(crate) fn reopen_read_write(&self) -> DbResult<()> {
        let _op = self.acquire_operation()?;
        let mut state = self.lock_connection(None)?;
        if !state.read_only {
            return Ok(());
        }
        if state.transactions.is_active() {
            return Err(DbError::illegal_state(
                "cannot reopen read-write while a transaction is in progress",
            ));
        }
        let conn = open_connection(
            &self.inner.path,
            OpenFlags::READ_WRITE_CREATE,
            &self.inner.config,
            &self.inner.credential(),
            &self.inner.key_hooks,
            state.wal,
        )?;
        state.conn = Some(conn);
        state.read_only = false;
        drop(state);
        self.inner
            .log
            .info(format_args!("reopened {} read-write", self.inner.path));
        Ok(())
    }

    /// Registers an observer for committed changes.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if already registered.
    pub fn register_content_observer(&self, observer: Arc<dyn ContentObserver>) -> DbResult<()> {
        self.lock_content_observers().register(observer)
    }

    /// Unregisters a content observer.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if not registered.
    pub fn unregister_content_observer(
        &self,
        observer: &Arc<dyn ContentObserver>,
    ) -> DbResult<()> {
        self.lock_content_observers().unregister(observer)
    }

    /// Releases the owner's reference. The connection closes once in-flight
    /// operations finish; later operations fail with [`DbError::Closed`].
    ///
    /// Closing more than once, from any clone, has no further effect.
    pub fn close(&self) {
        if !self.inner.owner_released.swap(true, Ordering::AcqRel) {
            self.inner.refs.release(&*self.inner);
        }
    }

    /// Releases the reference held by an open helper.
    pub(crate) fn release_from_container(&self) {
        if !self.inner.owner_released.swap(true, Ordering::AcqRel) {
            self.inner.refs.release_from_container(&*self.inner);
        }
    }

    /// Returns `true` until the handle is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.owner_released.load(Ordering::Acquire) && self.inner.lock_state().conn.is_some()
    }

    /// Returns `true` if the primary connection cannot write.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.lock_state().read_only
    }

    /// Location of the store.
    #[must_use]
    pub fn path(&self) -> &DatabasePath {
        &self.inner.path
    }

    /// Configuration the handle was opened with.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Sink used for diagnostics.
    #[must_use]
    pub fn log(&self) -> &LogSink {
        &self.inner.log
    }

    #[cfg(test)]
    pub(crate) fn waiting_threads(&self) -> usize {
        self.inner.lock_state().waiters
    }
}

fn remove_if_exists(path: &Path) -> DbResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
