//! Unit tests for cursor positioning, refills and lifecycle.

use std::sync::atomic::AtomicUsize;

use proptest::prelude::*;

use super::*;
use crate::config::{DatabaseConfig, OpenFlags};
use crate::connection::DatabasePath;
use crate::database::DatabaseOptions;
use crate::logger::test_support::RecordingLogger;
use crate::logger::{LogLevel, LogSink};
use crate::params;

/// Opens an in-memory store whose windows are exactly `window_bytes`.
fn numbers_db(rows: i64, window_bytes: usize) -> Database {
    let db = Database::open(
        DatabasePath::InMemory,
        OpenFlags::READ_WRITE_CREATE,
        DatabaseOptions {
            config: DatabaseConfig::default().with_window_bytes(window_bytes),
            ..DatabaseOptions::default()
        },
    )
    .expect("open");
    db.execute_batch("CREATE TABLE t (a INTEGER, b INTEGER);")
        .expect("create");
    db.run_in_transaction(|db| {
        for i in 0..rows {
            db.execute("INSERT INTO t VALUES (?1, ?2)", &params![i, i * 100])?;
        }
        Ok(())
    })
    .expect("insert");
    db
}

#[derive(Default)]
struct CountingObserver {
    changed: AtomicUsize,
    invalidated: AtomicUsize,
    content: AtomicUsize,
}

impl DataSetObserver for CountingObserver {
    fn on_changed(&self) {
        self.changed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_invalidated(&self) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}

impl ContentObserver for CountingObserver {
    fn on_change(&self, _self_change: bool) {
        self.content.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_moving_past_the_window_refills_once() {
    let db = numbers_db(10, 144);
    let mut cursor = db.query("SELECT a, b FROM t ORDER BY a", &[]).expect("query");
    assert_eq!(cursor.count().expect("count"), 10);
    assert_eq!(cursor.window_fills(), 1);

    for row in 0..6 {
        assert!(cursor.move_to_position(row).expect("move"));
        assert_eq!(cursor.get_long(0).expect("read"), row);
    }
    assert_eq!(cursor.window_fills(), 1);

    assert!(cursor.move_to_position(7).expect("move"));
    assert_eq!(cursor.window_fills(), 2);
    assert_eq!(cursor.get_long(0).expect("read"), 7);
    assert_eq!(cursor.get_long(1).expect("read"), 700);

    // The refill started a third of a window early, so row 5 is still held.
    assert!(cursor.move_to_position(5).expect("move"));
    assert_eq!(cursor.window_fills(), 2);
    assert_eq!(cursor.get_long(0).expect("read"), 5);
}

#[test]
fn test_position_is_clamped() {
    let db = numbers_db(3, 4096);
    let mut cursor = db.query("SELECT a FROM t ORDER BY a", &[]).expect("query");
    assert!(cursor.is_before_first().expect("state"));
    assert!(!cursor.move_to_position(10).expect("move"));
    assert_eq!(cursor.position(), 3);
    assert!(cursor.is_after_last().expect("state"));
    assert!(!cursor.move_to_position(-5).expect("move"));
    assert_eq!(cursor.position(), -1);

    assert!(cursor.move_to_last().expect("move"));
    assert!(cursor.is_last().expect("state"));
    assert_eq!(cursor.get_long(0).expect("read"), 2);
    assert!(!cursor.move_to_next().expect("move"));
    assert!(matches!(
        cursor.get_long(0),
        Err(DbError::OutOfBounds { index: 3, count: 3 })
    ));
    assert!(cursor.move_to_previous().expect("move"));
    assert!(cursor.move_to_first().expect("move"));
    assert!(cursor.is_first().expect("state"));
}

#[test]
fn test_empty_result() {
    let db = numbers_db(0, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    assert_eq!(cursor.count().expect("count"), 0);
    assert!(!cursor.move_to_first().expect("move"));
    assert!(cursor.is_before_first().expect("state"));
    assert!(cursor.is_after_last().expect("state"));
    assert!(!cursor.is_first().expect("state"));
    assert!(!cursor.is_last().expect("state"));
}

#[test]
fn test_deactivate_then_requery_keeps_selection_arguments() {
    let db = numbers_db(10, 4096);
    let mut cursor = db
        .query("SELECT a FROM t WHERE a >= ?1 ORDER BY a", &params![4])
        .expect("query");
    assert_eq!(cursor.count().expect("count"), 6);
    assert!(cursor.move_to_first().expect("move"));

    cursor.deactivate().expect("deactivate");
    assert!(cursor.is_stale());
    assert!(cursor.window().is_none());
    assert!(matches!(cursor.get_long(0), Err(DbError::StaleData(_))));
    assert!(matches!(cursor.move_to_first(), Err(DbError::StaleData(_))));

    assert!(cursor.requery().expect("requery"));
    assert!(!cursor.is_stale());
    assert_eq!(cursor.position(), -1);
    assert_eq!(cursor.count().expect("count"), 6);
    assert!(cursor.move_to_first().expect("move"));
    assert_eq!(cursor.get_long(0).expect("read"), 4);
}

#[test]
fn test_new_selection_arguments_apply_on_requery() {
    let db = numbers_db(10, 4096);
    let mut cursor = db
        .query("SELECT a FROM t WHERE a >= ?1", &params![4])
        .expect("query");
    assert_eq!(cursor.count().expect("count"), 6);
    cursor
        .set_selection_arguments(params![8])
        .expect("set args");
    assert!(cursor.requery().expect("requery"));
    assert_eq!(cursor.count().expect("count"), 2);
}

#[test]
fn test_requery_sees_new_rows() {
    let db = numbers_db(2, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    assert_eq!(cursor.count().expect("count"), 2);
    db.execute("INSERT INTO t VALUES (?1, ?2)", &params![2, 200])
        .expect("insert");
    assert_eq!(cursor.count().expect("cached"), 2);
    assert!(cursor.requery().expect("requery"));
    assert_eq!(cursor.count().expect("count"), 3);
}

#[test]
fn test_closed_cursor_rejects_everything() {
    let db = numbers_db(3, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    assert!(cursor.move_to_first().expect("move"));
    cursor.close();
    cursor.close();
    assert!(cursor.is_closed());
    assert!(matches!(cursor.get_long(0), Err(DbError::Closed(_))));
    assert!(matches!(cursor.count(), Err(DbError::Closed(_))));
    assert!(matches!(cursor.deactivate(), Err(DbError::Closed(_))));
    assert!(!cursor.requery().expect("requery on closed"));
}

#[test]
fn test_requery_after_database_close_returns_false() {
    let db = numbers_db(3, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    assert_eq!(cursor.count().expect("count"), 3);
    db.close();
    assert!(!cursor.requery().expect("requery"));
}

#[test]
fn test_column_bounds_and_lookup() {
    let db = numbers_db(1, 4096);
    let mut cursor = db
        .query("SELECT a AS first, b AS Second FROM t", &[])
        .expect("query");
    assert_eq!(cursor.column_count(), 2);
    assert_eq!(cursor.column_names(), ["first", "Second"]);
    assert_eq!(cursor.column_index("first"), Some(0));
    assert_eq!(cursor.column_index("t.first"), Some(0));
    assert_eq!(cursor.column_index("second"), Some(1));
    assert_eq!(cursor.column_index("third"), None);
    assert!(matches!(
        cursor.column_index_or_err("third"),
        Err(DbError::NoSuchColumn(_))
    ));
    assert_eq!(cursor.column_name(1).expect("name"), "Second");

    assert!(cursor.move_to_first().expect("move"));
    assert!(matches!(
        cursor.get_long(2),
        Err(DbError::ColumnOutOfBounds { column: 2, count: 2 })
    ));
}

#[test]
fn test_typed_reads() {
    let db = Database::open_in_memory().expect("open");
    db.execute_batch(
        "CREATE TABLE v (i INTEGER, r REAL, s TEXT, b BLOB, n);
         INSERT INTO v VALUES (7, 2.5, 'hi', x'0102', NULL);",
    )
    .expect("setup");
    let mut cursor = db.query("SELECT i, r, s, b, n FROM v", &[]).expect("query");
    assert!(cursor.move_to_first().expect("move"));
    assert_eq!(cursor.get_long(0).expect("i"), 7);
    assert_eq!(cursor.get_double(1).expect("r"), 2.5);
    assert_eq!(cursor.get_string(2).expect("s").as_deref(), Some("hi"));
    assert_eq!(cursor.get_blob(3).expect("b"), Some(vec![1, 2]));
    assert!(cursor.is_null(4).expect("n"));
    assert_eq!(cursor.get_type(0).expect("type"), FieldType::Integer);
    assert_eq!(cursor.get_type(4).expect("type"), FieldType::Null);
    assert!(matches!(cursor.get_blob(2), Err(DbError::TypeMismatch(_))));
}

#[test]
fn test_data_set_observers_follow_the_lifecycle() {
    let db = numbers_db(2, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    let counting = Arc::new(CountingObserver::default());
    let observer: Arc<dyn DataSetObserver> = counting.clone();
    cursor
        .register_data_set_observer(Arc::clone(&observer))
        .expect("register");
    assert!(matches!(
        cursor.register_data_set_observer(Arc::clone(&observer)),
        Err(DbError::IllegalState(_))
    ));

    cursor.deactivate().expect("deactivate");
    assert_eq!(counting.invalidated.load(Ordering::SeqCst), 1);
    assert!(cursor.requery().expect("requery"));
    assert_eq!(counting.changed.load(Ordering::SeqCst), 1);

    cursor.close();
    assert_eq!(counting.invalidated.load(Ordering::SeqCst), 2);
}

#[test]
fn test_unregistered_observer_is_not_notified() {
    let db = numbers_db(2, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    let counting = Arc::new(CountingObserver::default());
    let observer: Arc<dyn DataSetObserver> = counting.clone();
    cursor
        .register_data_set_observer(Arc::clone(&observer))
        .expect("register");
    cursor
        .unregister_data_set_observer(&observer)
        .expect("unregister");
    assert!(matches!(
        cursor.unregister_data_set_observer(&observer),
        Err(DbError::IllegalState(_))
    ));
    cursor.deactivate().expect("deactivate");
    assert_eq!(counting.invalidated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_tracked_cursor_goes_stale_on_commit() {
    let db = numbers_db(2, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    let counting = Arc::new(CountingObserver::default());
    cursor
        .register_content_observer(counting.clone())
        .expect("register");
    cursor.track_changes().expect("track");
    assert_eq!(cursor.count().expect("count"), 2);

    db.execute("INSERT INTO t VALUES (?1, ?2)", &params![2, 200])
        .expect("insert");
    assert!(cursor.is_stale());
    assert_eq!(counting.content.load(Ordering::SeqCst), 1);
    assert!(matches!(cursor.count(), Err(DbError::StaleData(_))));

    assert!(cursor.requery().expect("requery"));
    assert_eq!(cursor.count().expect("count"), 3);
}

#[test]
fn test_untracked_cursor_ignores_commits() {
    let db = numbers_db(2, 4096);
    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    assert_eq!(cursor.count().expect("count"), 2);
    db.execute("DELETE FROM t", &[]).expect("delete");
    assert!(!cursor.is_stale());
    assert_eq!(cursor.count().expect("cached count"), 2);
}

#[test]
fn test_set_window_recounts_with_the_new_window() {
    let db = numbers_db(10, 4096);
    let mut cursor = db.query("SELECT a, b FROM t ORDER BY a", &[]).expect("query");
    assert_eq!(cursor.count().expect("count"), 10);
    cursor
        .set_window(Some(CursorWindow::with_fixed_size(144)))
        .expect("set window");
    assert!(cursor.move_to_position(9).expect("move"));
    assert_eq!(cursor.get_long(1).expect("read"), 900);
    assert_eq!(cursor.window().map(CursorWindow::capacity), Some(144));

    cursor.set_window(None).expect("drop window");
    assert!(cursor.window().is_none());
    assert_eq!(cursor.count().expect("count"), 10);
}

#[test]
fn test_set_window_on_a_row_refills_around_it() {
    let db = numbers_db(10, 4096);
    let mut cursor = db.query("SELECT a, b FROM t ORDER BY a", &[]).expect("query");
    assert!(cursor.move_to_position(5).expect("move"));
    let fills = cursor.window_fills();

    cursor
        .set_window(Some(CursorWindow::with_fixed_size(144)))
        .expect("set window");
    assert_eq!(cursor.window_fills(), fills + 1);
    assert_eq!(cursor.position(), 5);
    assert_eq!(cursor.get_long(0).expect("read"), 5);
    assert_eq!(cursor.get_long(1).expect("read"), 500);
    assert!(cursor.window().is_some_and(|window| window.contains(5)));
    assert_eq!(cursor.count().expect("count"), 10);
}

#[test]
fn test_set_window_clamps_a_position_past_the_new_count() {
    let db = numbers_db(10, 4096);
    let mut cursor = db.query("SELECT a FROM t ORDER BY a", &[]).expect("query");
    assert!(cursor.move_to_position(8).expect("move"));
    db.execute("DELETE FROM t WHERE a >= ?1", &params![5])
        .expect("delete");

    cursor
        .set_window(Some(CursorWindow::new(4096, 4096)))
        .expect("set window");
    assert_eq!(cursor.count().expect("count"), 5);
    assert_eq!(cursor.position(), 5);
    assert!(cursor.is_after_last().expect("after last"));
    assert!(matches!(
        cursor.get_long(0),
        Err(DbError::OutOfBounds { .. })
    ));
}

#[test]
fn test_canceled_signal_fails_the_fill() {
    let db = numbers_db(3, 4096);
    let signal = CancellationSignal::new();
    let mut cursor = db
        .query_with_cancel("SELECT a FROM t", &[], signal.clone())
        .expect("query");
    signal.cancel();
    assert!(matches!(cursor.count(), Err(DbError::Canceled)));
}

#[test]
fn test_cancel_interrupts_a_running_fill() {
    let db = numbers_db(0, 4096);
    let signal = CancellationSignal::new();
    let mut cursor = db
        .query_with_cancel(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c",
            &[],
            signal.clone(),
        )
        .expect("query");
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(200));
        signal.cancel();
    });
    // Counting steps the unbounded result until the signal fires.
    let result = cursor.count();
    canceller.join().expect("canceller thread");
    assert!(matches!(result, Err(DbError::Canceled)));
}

#[test]
fn test_close_releases_the_change_tracker() {
    let logger = Arc::new(RecordingLogger::default());
    let db = Database::open(
        DatabasePath::InMemory,
        OpenFlags::READ_WRITE_CREATE,
        DatabaseOptions {
            log: LogSink::new(logger.clone()),
            ..DatabaseOptions::default()
        },
    )
    .expect("open");
    db.execute_batch("CREATE TABLE t (a INTEGER);")
        .expect("create");

    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    cursor.track_changes().expect("track");
    let tracker = Arc::clone(cursor.change_tracker.as_ref().expect("tracker"));
    cursor.close();
    assert!(matches!(
        db.unregister_content_observer(&tracker),
        Err(DbError::IllegalState(_))
    ));
    assert!(!logger.contains(LogLevel::Warn, "already unregistered"));

    let mut cursor = db.query("SELECT a FROM t", &[]).expect("query");
    cursor.track_changes().expect("track");
    let tracker = Arc::clone(cursor.change_tracker.as_ref().expect("tracker"));
    db.unregister_content_observer(&tracker)
        .expect("unregister behind the cursor's back");
    cursor.close();
    assert!(logger.contains(LogLevel::Warn, "already unregistered"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_move_sequence_reads_the_right_row(
        rows in 1_i64..40,
        moves in proptest::collection::vec(-5_i64..45, 1..30),
    ) {
        let db = numbers_db(rows, 144);
        let mut cursor = db.query("SELECT a, b FROM t ORDER BY a", &[]).expect("query");
        for target in moves {
            let on_row = cursor.move_to_position(target).expect("move");
            prop_assert_eq!(on_row, (0..rows).contains(&target));
            prop_assert_eq!(cursor.position(), target.clamp(-1, rows));
            if on_row {
                prop_assert_eq!(cursor.get_long(0).expect("read"), target);
                prop_assert_eq!(cursor.get_long(1).expect("read"), target * 100);
            }
        }
    }
}
