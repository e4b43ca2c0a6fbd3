//! Lazily opened, versioned handle to a store.
//!
//! An [`OpenHelper`] opens its store on the first call to
//! [`OpenHelper::writable_database`] or [`OpenHelper::readable_database`],
//! brings the schema to the target version and caches the handle for later
//! calls. The open sequence is:
//!
//! 1. open (and key) the store, falling back to read-only for readable
//!    requests when opening for writing fails;
//! 2. `on_configure`;
//! 3. compare the stored version with the target and run one transition
//!    (see [`Transition`]);
//! 4. `on_open`.
//!
//! A store whose version is below the minimum supported version is handed
//! to `on_before_delete`, deleted and created again.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cipher::{Credential, KeyHooks};
use crate::config::{HelperConfig, OpenFlags};
use crate::connection::{Connection, DatabasePath};
use crate::cursor::CursorFactory;
use crate::database::{Database, DatabaseOptions};
use crate::error::{DbError, DbResult};
use crate::logger::LogSink;
use crate::migration::{self, Transition};

/// Callback that receives the handle being opened.
pub type DatabaseHook = Arc<dyn Fn(&Database) -> DbResult<()> + Send + Sync>;

/// Callback that receives the handle and the `(from, to)` versions.
pub type VersionHook = Arc<dyn Fn(&Database, i64, i64) -> DbResult<()> + Send + Sync>;

/// Callbacks invoked at fixed points of the open sequence. Every slot is
/// optional.
///
/// An unset create or upgrade hook does nothing; the version is still
/// persisted. An unset downgrade hook fails the open with
/// [`DbError::DowngradeUnsupported`].
#[derive(Clone, Default)]
pub struct OpenHooks {
    configure: Option<DatabaseHook>,
    create: Option<DatabaseHook>,
    upgrade: Option<VersionHook>,
    downgrade: Option<VersionHook>,
    open: Option<DatabaseHook>,
    before_delete: Option<DatabaseHook>,
    key: KeyHooks,
}

impl OpenHooks {
    /// Creates an empty set of hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs after the store is opened and keyed, before the version check.
    /// Connection-wide settings belong here.
    #[must_use]
    pub fn on_configure(
        mut self,
        hook: impl Fn(&Database) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.configure = Some(Arc::new(hook));
        self
    }

    /// Runs when the store is new.
    #[must_use]
    pub fn on_create(
        mut self,
        hook: impl Fn(&Database) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.create = Some(Arc::new(hook));
        self
    }

    /// Runs when the stored version is older than the target.
    #[must_use]
    pub fn on_upgrade(
        mut self,
        hook: impl Fn(&Database, i64, i64) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.upgrade = Some(Arc::new(hook));
        self
    }

    /// Runs when the stored version is newer than the target.
    #[must_use]
    pub fn on_downgrade(
        mut self,
        hook: impl Fn(&Database, i64, i64) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.downgrade = Some(Arc::new(hook));
        self
    }

    /// Runs last, after any migration.
    #[must_use]
    pub fn on_open(
        mut self,
        hook: impl Fn(&Database) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.open = Some(Arc::new(hook));
        self
    }

    /// Runs before an obsolete store is deleted.
    #[must_use]
    pub fn on_before_delete(
        mut self,
        hook: impl Fn(&Database) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.before_delete = Some(Arc::new(hook));
        self
    }

    /// Runs on every new connection before it is keyed.
    #[must_use]
    pub fn pre_key(
        mut self,
        hook: impl Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.key.pre_key = Some(Arc::new(hook));
        self
    }

    /// Runs on every new connection after its key was verified.
    #[must_use]
    pub fn post_key(
        mut self,
        hook: impl Fn(&Connection) -> DbResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.key.post_key = Some(Arc::new(hook));
        self
    }

    fn run(hook: Option<&DatabaseHook>, db: &Database) -> DbResult<()> {
        hook.map_or(Ok(()), |hook| hook(db))
    }

    pub(crate) fn create(&self, db: &Database) -> DbResult<()> {
        Self::run(self.create.as_ref(), db)
    }

    pub(crate) fn upgrade(&self, db: &Database, from: i64, to: i64) -> DbResult<()> {
        self.upgrade
            .as_ref()
            .map_or(Ok(()), |hook| hook(db, from, to))
    }

    pub(crate) fn downgrade(&self, db: &Database, from: i64, to: i64) -> DbResult<()> {
        self.downgrade
            .as_ref()
            .map_or(Err(DbError::DowngradeUnsupported { from, to }), |hook| {
                hook(db, from, to)
            })
    }
}

impl fmt::Debug for OpenHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenHooks")
            .field("configure", &self.configure.is_some())
            .field("create", &self.create.is_some())
            .field("upgrade", &self.upgrade.is_some())
            .field("downgrade", &self.downgrade.is_some())
            .field("open", &self.open.is_some())
            .field("before_delete", &self.before_delete.is_some())
            .field("key", &self.key)
            .finish()
    }
}

#[derive(Default)]
struct HelperState {
    database: Option<Database>,
    initializing: bool,
    write_ahead_logging: bool,
}

/// Outcome of one pass of the open sequence.
enum Opened {
    Ready(Database),
    /// The obsolete store was deleted; open again.
    Deleted,
}

/// Opens, migrates and caches a store handle.
pub struct OpenHelper {
    config: HelperConfig,
    hooks: OpenHooks,
    credential: Arc<Credential>,
    log: LogSink,
    cursor_factory: Option<Arc<dyn CursorFactory>>,
    state: Mutex<HelperState>,
}

impl OpenHelper {
    /// Creates a helper. Nothing is opened until a handle is requested.
    #[must_use]
    pub fn new(
        config: HelperConfig,
        credential: Credential,
        hooks: OpenHooks,
        log: LogSink,
    ) -> Self {
        let write_ahead_logging = config.write_ahead_logging;
        Self {
            config,
            hooks,
            credential: Arc::new(credential),
            log,
            cursor_factory: None,
            state: Mutex::new(HelperState {
                write_ahead_logging,
                ..HelperState::default()
            }),
        }
    }

    /// Uses `factory` for cursors created by handles this helper opens.
    #[must_use]
    pub fn with_cursor_factory(mut self, factory: Arc<dyn CursorFactory>) -> Self {
        self.cursor_factory = Some(factory);
        self
    }

    /// Store file path, or `None` for an in-memory store.
    #[must_use]
    pub fn database_name(&self) -> Option<&Path> {
        self.config.name.as_deref()
    }

    /// Configuration the helper was created with.
    #[must_use]
    pub const fn config(&self) -> &HelperConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HelperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a handle that can write, opening and migrating the store if
    /// needed. A cached read-only handle is reopened read-write.
    ///
    /// # Errors
    ///
    /// [`DbError::RecursiveInitialization`] while another open of this helper
    /// is in progress, hook errors, [`DbError::DowngradeUnsupported`] and
    /// store errors.
    pub fn writable_database(&self) -> DbResult<Database> {
        self.get_database(true)
    }

    /// Returns a handle for reading. If the store cannot be opened for
    /// writing it is opened read-only, which fails with
    /// [`DbError::ReadOnlyMigration`] if the schema needs a migration.
    ///
    /// # Errors
    ///
    /// As [`OpenHelper::writable_database`].
    pub fn readable_database(&self) -> DbResult<Database> {
        self.get_database(false)
    }

    fn get_database(&self, writable: bool) -> DbResult<Database> {
        loop {
            let (cached, wal) = {
                let mut state = self.lock();
                if let Some(db) = &state.database {
                    if !db.is_open() {
                        state.database = None;
                    } else if !writable || !db.is_read_only() {
                        return Ok(db.clone());
                    }
                }
                if state.initializing {
                    return Err(DbError::RecursiveInitialization);
                }
                state.initializing = true;
                (state.database.clone(), state.write_ahead_logging)
            };

            let opened = self.initialize(cached, writable, wal);

            let mut state = self.lock();
            state.initializing = false;
            let ready = match opened {
                Ok(Opened::Ready(db)) => Some(db),
                Ok(Opened::Deleted) => None,
                Err(err) => return Err(err),
            };
            state.database.clone_from(&ready);
            drop(state);
            if let Some(db) = ready {
                return Ok(db);
            }
        }
    }

    fn initialize(&self, cached: Option<Database>, writable: bool, wal: bool) -> DbResult<Opened> {
        let fresh = cached.is_none();
        let db = match cached {
            Some(db) => {
                if writable && db.is_read_only() {
                    db.reopen_read_write()?;
                }
                db
            }
            None => self.open_database(writable, wal)?,
        };
        match self.prepare(&db) {
            Ok(true) => Ok(Opened::Ready(db)),
            Ok(false) => Ok(Opened::Deleted),
            Err(err) => {
                if fresh {
                    db.release_from_container();
                }
                Err(err)
            }
        }
    }

    fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            config: self.config.database.clone(),
            credential: Arc::clone(&self.credential),
            key_hooks: self.hooks.key.clone(),
            log: self.log.clone(),
            cursor_factory: self.cursor_factory.clone(),
        }
    }

    fn open_database(&self, writable: bool, wal: bool) -> DbResult<Database> {
        let path = self
            .config
            .name
            .clone()
            .map_or(DatabasePath::InMemory, DatabasePath::File);
        let flags = OpenFlags::READ_WRITE_CREATE.with_write_ahead_logging(wal);
        match Database::open(path.clone(), flags, self.options()) {
            Ok(db) => Ok(db),
            Err(err) if writable || path.is_in_memory() => Err(err),
            Err(err) => {
                self.log.warn(format_args!(
                    "couldn't open {path} for writing (will try read-only): {err}"
                ));
                Database::open(path, OpenFlags::READ_ONLY, self.options())
            }
        }
    }

    /// Configures, migrates and opens `db`. Returns `false` if the store was
    /// obsolete and has been deleted.
    fn prepare(&self, db: &Database) -> DbResult<bool> {
        OpenHooks::run(self.hooks.configure.as_ref(), db)?;

        let version = db.version()?;
        let target = self.config.target_version;
        let transition = Transition::plan(version, self.config.min_supported_version, target);
        if transition.is_migration() && db.is_read_only() {
            return Err(DbError::ReadOnlyMigration {
                from: version,
                to: target,
            });
        }
        if let Transition::Recreate { from } = transition {
            self.delete_obsolete(db, from)?;
            return Ok(false);
        }
        migration::migrate(db, transition, target, &self.hooks)?;

        OpenHooks::run(self.hooks.open.as_ref(), db)?;
        Ok(true)
    }

    fn delete_obsolete(&self, db: &Database, from: i64) -> DbResult<()> {
        self.log.info(format_args!(
            "{}: version {from} is below the minimum supported version {}; recreating",
            db.path(),
            self.config.min_supported_version
        ));
        OpenHooks::run(self.hooks.before_delete.as_ref(), db)?;
        let file = db.path().file().map(Path::to_path_buf);
        db.release_from_container();
        if let Some(file) = file {
            if !Database::delete_database(&file)? {
                return Err(DbError::illegal_state(format!(
                    "unable to delete obsolete database {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    /// Enables or disables write-ahead logging. An open writable handle
    /// switches immediately; otherwise the setting applies at the next open.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] while a transaction is in progress on the
    /// open handle.
    pub fn set_write_ahead_logging_enabled(&self, enabled: bool) -> DbResult<()> {
        let mut state = self.lock();
        if state.write_ahead_logging == enabled {
            return Ok(());
        }
        let writable = state
            .database
            .as_ref()
            .filter(|db| db.is_open() && !db.is_read_only());
        if let Some(db) = writable {
            if enabled {
                db.enable_write_ahead_logging()?;
            } else {
                db.disable_write_ahead_logging()?;
            }
        }
        state.write_ahead_logging = enabled;
        drop(state);
        Ok(())
    }

    /// Closes the cached handle.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] while the store is being opened.
    pub fn close(&self) -> DbResult<()> {
        let mut state = self.lock();
        if state.initializing {
            return Err(DbError::illegal_state("closed during initialization"));
        }
        let cached = state.database.take();
        drop(state);
        if let Some(db) = cached {
            db.release_from_container();
        }
        Ok(())
    }
}

impl fmt::Debug for OpenHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenHelper")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
