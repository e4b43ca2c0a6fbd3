//! Windowed cursor over a query result.
//!
//! A [`Cursor`] holds a logical position in `[-1, count]` and at most one
//! [`CursorWindow`] with the rows around it. Moving inside the window is
//! free. Moving outside it refills the window from the store, starting a
//! third of a window before the target so that scrolling back a little does
//! not refill again.
//!
//! The row count is computed by the first fill and cached until
//! [`Cursor::requery`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cancel::CancellationSignal;
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::observer::{
    notify_changed, notify_content_changed, notify_invalidated, ContentObserver, DataSetObserver,
    ObserverRegistry,
};
use crate::value::Value;
use crate::window::{CursorWindow, FieldType};

/// SQL and bind arguments a cursor re-executes on every fill.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Query text.
    pub sql: String,
    /// Positional bind arguments.
    pub args: Vec<Value>,
    /// Signal that cancels fills of this query.
    pub cancellation: Option<CancellationSignal>,
}

impl QuerySpec {
    /// Creates a query with no cancellation signal.
    #[must_use]
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
            cancellation: None,
        }
    }

    /// Attaches a cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = Some(signal);
        self
    }
}

/// Builds cursors for a database.
///
/// The default builds a plain [`Cursor`]. A custom factory can, for
/// example, give cursors a differently sized window or register observers
/// up front.
pub trait CursorFactory: Send + Sync {
    /// Creates a cursor for `query`, whose result has `columns`.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn new_cursor(
        &self,
        db: &Database,
        query: QuerySpec,
        columns: Vec<String>,
    ) -> DbResult<Cursor>;
}

/// Factory used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCursorFactory;

impl CursorFactory for DefaultCursorFactory {
    fn new_cursor(
        &self,
        db: &Database,
        query: QuerySpec,
        columns: Vec<String>,
    ) -> DbResult<Cursor> {
        Ok(Cursor::new(db.clone(), query, columns))
    }
}

type ContentObservers = Arc<Mutex<ObserverRegistry<dyn ContentObserver>>>;

/// Registered on the database by [`Cursor::track_changes`].
struct ChangeTracker {
    stale: Arc<AtomicBool>,
    observers: ContentObservers,
}

impl ContentObserver for ChangeTracker {
    fn on_change(&self, self_change: bool) {
        self.stale.store(true, Ordering::Release);
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        notify_content_changed(&observers, self_change);
    }
}

/// A position over a query result, backed by a window of rows.
pub struct Cursor {
    db: Database,
    query: QuerySpec,
    columns: Vec<String>,
    column_map: HashMap<String, usize>,
    position: i64,
    count: Option<usize>,
    window_capacity_rows: usize,
    window: Option<CursorWindow>,
    closed: bool,
    stale: Arc<AtomicBool>,
    data_set_observers: ObserverRegistry<dyn DataSetObserver>,
    content_observers: ContentObservers,
    change_tracker: Option<Arc<dyn ContentObserver>>,
    window_fills: AtomicUsize,
}

/// Picks where a fill should start so the window straddles `position`.
const fn pick_fill_start(position: usize, capacity_rows: usize) -> usize {
    position.saturating_sub(capacity_rows / 3)
}

impl Cursor {
    /// Creates an unfilled cursor. Normally called by a [`CursorFactory`].
    #[must_use]
    pub fn new(db: Database, query: QuerySpec, columns: Vec<String>) -> Self {
        let column_map = columns
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();
        Self {
            db,
            query,
            columns,
            column_map,
            position: -1,
            count: None,
            window_capacity_rows: 0,
            window: None,
            closed: false,
            stale: Arc::new(AtomicBool::new(false)),
            data_set_observers: ObserverRegistry::new(),
            content_observers: Arc::new(Mutex::new(ObserverRegistry::new())),
            change_tracker: None,
            window_fills: AtomicUsize::new(0),
        }
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.closed {
            Err(DbError::closed("cursor"))
        } else {
            Ok(())
        }
    }

    fn ensure_active(&self) -> DbResult<()> {
        self.ensure_open()?;
        if self.stale.load(Ordering::Acquire) {
            return Err(DbError::StaleData(
                "the cursor was deactivated or its data changed; call requery".to_string(),
            ));
        }
        Ok(())
    }

    /// Refills the window so it holds `required`.
    fn fill_window(&mut self, required: usize) -> DbResult<()> {
        let config = self.db.config();
        let window = self.window.get_or_insert_with(|| {
            CursorWindow::new(config.window_initial_bytes, config.window_max_bytes)
        });
        let count_all = self.count.is_none();
        let start = if count_all {
            pick_fill_start(required, 0)
        } else {
            pick_fill_start(required, self.window_capacity_rows)
        };
        let result = self
            .db
            .fill_window(&self.query, window, start, required, count_all)?;
        if count_all {
            self.count = Some(result.total_rows);
            self.window_capacity_rows = window.num_rows();
        }
        self.window_fills.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn count_unchecked(&mut self) -> DbResult<usize> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        self.fill_window(0)?;
        Ok(self.count.unwrap_or(0))
    }

    /// Number of rows in the result set, computed once and cached.
    ///
    /// # Errors
    ///
    /// Fails on a closed or stale cursor and with store errors from the
    /// first fill.
    pub fn count(&mut self) -> DbResult<usize> {
        self.ensure_active()?;
        self.count_unchecked()
    }

    /// Current position; `-1` is before the first row, `count` after the last.
    #[must_use]
    pub const fn position(&self) -> i64 {
        self.position
    }

    /// Moves to `position`, clamping to `[-1, count]`.
    ///
    /// Returns `true` if the cursor ends on a row.
    ///
    /// # Errors
    ///
    /// Fails on a closed or stale cursor, or if a refill fails.
    pub fn move_to_position(&mut self, position: i64) -> DbResult<bool> {
        self.ensure_active()?;
        let count = i64::try_from(self.count_unchecked()?).unwrap_or(i64::MAX);
        if position >= count {
            self.position = count;
            return Ok(false);
        }
        if position < 0 {
            self.position = -1;
            return Ok(false);
        }
        let target = usize::try_from(position).unwrap_or(0);
        let covered = self
            .window
            .as_ref()
            .is_some_and(|window| window.contains(target));
        if !covered {
            if let Err(err) = self.fill_window(target) {
                self.position = -1;
                return Err(err);
            }
        }
        self.position = position;
        Ok(true)
    }

    /// Moves by `offset` rows relative to the current position.
    ///
    /// # Errors
    ///
    /// See [`Cursor::move_to_position`].
    pub fn move_by(&mut self, offset: i64) -> DbResult<bool> {
        self.move_to_position(self.position.saturating_add(offset))
    }

    /// Moves to the first row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::move_to_position`].
    pub fn move_to_first(&mut self) -> DbResult<bool> {
        self.move_to_position(0)
    }

    /// Moves to the last row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::move_to_position`].
    pub fn move_to_last(&mut self) -> DbResult<bool> {
        self.ensure_active()?;
        let count = i64::try_from(self.count_unchecked()?).unwrap_or(i64::MAX);
        self.move_to_position(count - 1)
    }

    /// Moves to the next row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::move_to_position`].
    pub fn move_to_next(&mut self) -> DbResult<bool> {
        self.move_by(1)
    }

    /// Moves to the previous row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::move_to_position`].
    pub fn move_to_previous(&mut self) -> DbResult<bool> {
        self.move_by(-1)
    }

    /// `true` if positioned on the first row.
    ///
    /// # Errors
    ///
    /// Fails on a closed or stale cursor.
    pub fn is_first(&mut self) -> DbResult<bool> {
        Ok(self.position == 0 && self.count()? != 0)
    }

    /// `true` if positioned on the last row.
    ///
    /// # Errors
    ///
    /// Fails on a closed or stale cursor.
    pub fn is_last(&mut self) -> DbResult<bool> {
        let count = self.count()?;
        Ok(count != 0 && self.position == i64::try_from(count).unwrap_or(i64::MAX) - 1)
    }

    /// `true` if before the first row, or the result is empty.
    ///
    /// # Errors
    ///
    /// Fails on a closed or stale cursor.
    pub fn is_before_first(&mut self) -> DbResult<bool> {
        Ok(self.count()? == 0 || self.position == -1)
    }

    /// `true` if after the last row, or the result is empty.
    ///
    /// # Errors
    ///
    /// Fails on a closed or stale cursor.
    pub fn is_after_last(&mut self) -> DbResult<bool> {
        let count = self.count()?;
        Ok(count == 0 || self.position == i64::try_from(count).unwrap_or(i64::MAX))
    }

    /// Column names, in result order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub const fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of `name`, or `None`. A `table.column` name is looked up by its
    /// column part.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.rsplit_once('.').map_or(name, |(_, column)| column);
        self.column_map.get(name).copied().or_else(|| {
            self.columns
                .iter()
                .position(|column| column.eq_ignore_ascii_case(name))
        })
    }

    /// Index of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NoSuchColumn`] if there is no such column.
    pub fn column_index_or_err(&self, name: &str) -> DbResult<usize> {
        self.column_index(name)
            .ok_or_else(|| DbError::NoSuchColumn(name.to_string()))
    }

    /// Name of the column at `column`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ColumnOutOfBounds`] for an invalid index.
    pub fn column_name(&self, column: usize) -> DbResult<&str> {
        self.columns
            .get(column)
            .map(String::as_str)
            .ok_or(DbError::ColumnOutOfBounds {
                column,
                count: self.columns.len(),
            })
    }

    /// Validates the position and column for a read and returns the window.
    fn readable(&self, column: usize) -> DbResult<(&CursorWindow, usize)> {
        self.ensure_active()?;
        let count = self.count.unwrap_or(0);
        let position = usize::try_from(self.position)
            .ok()
            .filter(|position| *position < count)
            .ok_or(DbError::OutOfBounds {
                index: self.position,
                count,
            })?;
        if column >= self.columns.len() {
            return Err(DbError::ColumnOutOfBounds {
                column,
                count: self.columns.len(),
            });
        }
        let window = self
            .window
            .as_ref()
            .ok_or_else(|| DbError::illegal_state("the cursor has no window"))?;
        Ok((window, position))
    }

    /// Reads an integer from the current row.
    ///
    /// # Errors
    ///
    /// [`DbError::Closed`], [`DbError::StaleData`] or a bounds error when the
    /// cursor cannot be read, [`DbError::TypeMismatch`] for blobs.
    pub fn get_long(&self, column: usize) -> DbResult<i64> {
        let (window, position) = self.readable(column)?;
        window.get_long(position, column)
    }

    /// Reads a float from the current row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::get_long`].
    pub fn get_double(&self, column: usize) -> DbResult<f64> {
        let (window, position) = self.readable(column)?;
        window.get_double(position, column)
    }

    /// Reads text from the current row; NULL is `None`.
    ///
    /// # Errors
    ///
    /// See [`Cursor::get_long`].
    pub fn get_string(&self, column: usize) -> DbResult<Option<String>> {
        let (window, position) = self.readable(column)?;
        window.get_string(position, column)
    }

    /// Reads a blob from the current row; NULL is `None`.
    ///
    /// # Errors
    ///
    /// See [`Cursor::get_long`]; numeric and text cells are a type mismatch.
    pub fn get_blob(&self, column: usize) -> DbResult<Option<Vec<u8>>> {
        let (window, position) = self.readable(column)?;
        window.get_blob(position, column)
    }

    /// Returns `true` if the cell in the current row is NULL.
    ///
    /// # Errors
    ///
    /// See [`Cursor::get_long`].
    pub fn is_null(&self, column: usize) -> DbResult<bool> {
        let (window, position) = self.readable(column)?;
        window.is_null(position, column)
    }

    /// Storage class of the cell in the current row.
    ///
    /// # Errors
    ///
    /// See [`Cursor::get_long`].
    pub fn get_type(&self, column: usize) -> DbResult<FieldType> {
        let (window, position) = self.readable(column)?;
        window.get_type(position, column)
    }

    /// Releases the window and makes reads fail with
    /// [`DbError::StaleData`] until [`Cursor::requery`]. Observers stay
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed cursor.
    pub fn deactivate(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        self.release_window();
        self.stale.store(true, Ordering::Release);
        notify_invalidated(&self.data_set_observers.snapshot());
        Ok(())
    }

    /// Re-executes the query, resets the position to `-1`, recomputes the
    /// count and clears staleness.
    ///
    /// Returns `false` if the cursor or its database is closed.
    ///
    /// # Errors
    ///
    /// Store failures while refilling.
    pub fn requery(&mut self) -> DbResult<bool> {
        if self.closed || !self.db.is_open() {
            return Ok(false);
        }
        self.position = -1;
        self.count = None;
        self.window_capacity_rows = 0;
        match self.fill_window(0) {
            Ok(()) => {}
            Err(DbError::Closed(_)) => return Ok(false),
            Err(err) => return Err(err),
        }
        self.stale.store(false, Ordering::Release);
        notify_changed(&self.data_set_observers.snapshot());
        Ok(true)
    }

    /// Releases everything. Every later operation fails with
    /// [`DbError::Closed`]; closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release_window();
        if let Some(tracker) = self.change_tracker.take() {
            if let Err(err) = self.db.unregister_content_observer(&tracker) {
                self.db.log().warn(format_args!(
                    "cursor change tracker was already unregistered: {err}"
                ));
            }
        }
        notify_invalidated(&self.data_set_observers.snapshot());
        self.data_set_observers.unregister_all();
        self.content_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister_all();
    }

    /// Returns `true` after [`Cursor::close`].
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns `true` while reads would fail with [`DbError::StaleData`].
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn release_window(&mut self) {
        if let Some(mut window) = self.window.take() {
            window.close();
        }
    }

    /// Replaces the bind arguments used by the next fill or requery.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed cursor.
    pub fn set_selection_arguments(&mut self, args: Vec<Value>) -> DbResult<()> {
        self.ensure_open()?;
        self.query.args = args;
        Ok(())
    }

    /// Query this cursor executes.
    #[must_use]
    pub const fn query(&self) -> &QuerySpec {
        &self.query
    }

    /// Swaps the window, closing the previous one first, and recounts.
    ///
    /// A cursor positioned on a row refills the new window around that row
    /// right away. Passing `None` leaves the cursor without a window until
    /// the next move.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed cursor, and store errors from
    /// the refill.
    pub fn set_window(&mut self, window: Option<CursorWindow>) -> DbResult<()> {
        self.ensure_open()?;
        self.release_window();
        let refill = window.is_some();
        self.window = window;
        self.count = None;
        self.window_capacity_rows = 0;
        if !refill || self.is_stale() {
            return Ok(());
        }
        let Ok(position) = usize::try_from(self.position) else {
            return Ok(());
        };
        self.fill_window(position)?;
        let count = self.count.unwrap_or(0);
        if position >= count {
            self.position = i64::try_from(count).unwrap_or(i64::MAX);
        }
        Ok(())
    }

    /// Window currently held, if any.
    #[must_use]
    pub const fn window(&self) -> Option<&CursorWindow> {
        self.window.as_ref()
    }

    /// Number of times the window was filled from the store.
    #[must_use]
    pub fn window_fills(&self) -> usize {
        self.window_fills.load(Ordering::Relaxed)
    }

    /// Registers a row-set observer.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if already registered, [`DbError::Closed`]
    /// on a closed cursor.
    pub fn register_data_set_observer(
        &mut self,
        observer: Arc<dyn DataSetObserver>,
    ) -> DbResult<()> {
        self.ensure_open()?;
        self.data_set_observers.register(observer)
    }

    /// Unregisters a row-set observer.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if not registered, [`DbError::Closed`] on a
    /// closed cursor.
    pub fn unregister_data_set_observer(
        &mut self,
        observer: &Arc<dyn DataSetObserver>,
    ) -> DbResult<()> {
        self.ensure_open()?;
        self.data_set_observers.unregister(observer)
    }

    /// Registers an observer for store changes seen by this cursor.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if already registered, [`DbError::Closed`]
    /// on a closed cursor.
    pub fn register_content_observer(
        &mut self,
        observer: Arc<dyn ContentObserver>,
    ) -> DbResult<()> {
        self.ensure_open()?;
        self.content_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(observer)
    }

    /// Unregisters a content observer.
    ///
    /// # Errors
    ///
    /// [`DbError::IllegalState`] if not registered, [`DbError::Closed`] on a
    /// closed cursor.
    pub fn unregister_content_observer(
        &mut self,
        observer: &Arc<dyn ContentObserver>,
    ) -> DbResult<()> {
        self.ensure_open()?;
        self.content_observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(observer)
    }

    /// Marks this cursor stale whenever the database reports a committed
    /// change, and forwards the change to this cursor's content observers.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed cursor.
    pub fn track_changes(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        if self.change_tracker.is_some() {
            return Ok(());
        }
        let tracker: Arc<dyn ContentObserver> = Arc::new(ChangeTracker {
            stale: Arc::clone(&self.stale),
            observers: Arc::clone(&self.content_observers),
        });
        self.db.register_content_observer(Arc::clone(&tracker))?;
        self.change_tracker = Some(tracker);
        Ok(())
    }

    /// Database this cursor reads from.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("sql", &self.query.sql)
            .field("position", &self.position)
            .field("count", &self.count)
            .field("closed", &self.closed)
            .field("stale", &self.is_stale())
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
