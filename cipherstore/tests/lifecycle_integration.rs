//! Open, migrate and reopen stores on disk through the open helper.

mod common;

use cipherstore::{Database, DbError, ErrorCategory, OpenHooks, Value};

use common::{open_helper, temp_store, HookLog};

fn has_table(db: &Database, name: &str) -> bool {
    db.query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
        &cipherstore::params![name],
    )
    .expect("lookup")
    .is_some()
}

#[test]
fn test_create_then_upgrade_then_no_transition() {
    let (_dir, path) = temp_store();
    let log = HookLog::default();

    let helper = open_helper(&path, 1, 0, log.hooks());
    let db = helper.writable_database().expect("create");
    assert_eq!(db.version().expect("version"), 1);
    assert!(has_table(&db, "t"));
    helper.close().expect("close");
    assert_eq!(log.take(), ["create", "open"]);

    let helper = open_helper(&path, 2, 1, log.hooks());
    let db = helper.writable_database().expect("upgrade");
    assert_eq!(db.version().expect("version"), 2);
    assert!(has_table(&db, "extra"));
    helper.close().expect("close");
    assert_eq!(log.take(), ["upgrade 1->2", "open"]);

    let helper = open_helper(&path, 2, 1, log.hooks());
    helper.writable_database().expect("reopen");
    helper.close().expect("close");
    assert_eq!(log.take(), ["open"]);
}

#[test]
fn test_store_below_minimum_is_recreated() {
    let (_dir, path) = temp_store();
    let log = HookLog::default();

    let helper = open_helper(&path, 1, 0, log.hooks());
    helper
        .writable_database()
        .expect("create")
        .execute("INSERT INTO t (name) VALUES ('old')", &[])
        .expect("insert");
    helper.close().expect("close");
    log.take();

    let helper = open_helper(&path, 3, 2, log.hooks());
    let db = helper.writable_database().expect("recreate");
    assert_eq!(log.take(), ["before_delete", "create", "open"]);
    assert_eq!(db.version().expect("version"), 3);
    assert_eq!(
        db.query_scalar("SELECT count(*) FROM t", &[]).expect("count"),
        Some(Value::Integer(0))
    );
}

#[test]
fn test_downgrade_runs_the_hook_once() {
    let (_dir, path) = temp_store();
    let log = HookLog::default();

    open_helper(&path, 3, 0, log.hooks())
        .writable_database()
        .expect("create")
        .close();
    log.take();

    let helper = open_helper(&path, 2, 0, log.hooks());
    let db = helper.writable_database().expect("downgrade");
    assert_eq!(log.take(), ["downgrade 3->2", "open"]);
    assert_eq!(db.version().expect("version"), 2);
}

#[test]
fn test_downgrade_without_hook_is_a_store_error() {
    let (_dir, path) = temp_store();
    open_helper(&path, 3, 0, OpenHooks::new())
        .writable_database()
        .expect("create")
        .close();

    let helper = open_helper(&path, 2, 0, OpenHooks::new());
    let err = helper.writable_database().expect_err("downgrade");
    assert!(matches!(err, DbError::DowngradeUnsupported { from: 3, to: 2 }));
    assert_eq!(err.category(), ErrorCategory::Store);

    let check = open_helper(&path, 3, 0, OpenHooks::new());
    assert_eq!(
        check.writable_database().expect("open").version().expect("version"),
        3
    );
}

#[test]
fn test_failed_upgrade_leaves_the_store_at_its_old_version() {
    let (_dir, path) = temp_store();
    open_helper(&path, 1, 0, HookLog::default().hooks())
        .writable_database()
        .expect("create")
        .close();

    let failing = OpenHooks::new().on_upgrade(|db, _, _| {
        db.execute_batch("DROP TABLE t;")?;
        Err(DbError::IllegalState("upgrade aborted".to_string()))
    });
    let helper = open_helper(&path, 2, 0, failing);
    assert!(matches!(
        helper.writable_database(),
        Err(DbError::IllegalState(_))
    ));

    let check = open_helper(&path, 1, 0, OpenHooks::new());
    let db = check.writable_database().expect("open");
    assert_eq!(db.version().expect("version"), 1);
    assert!(has_table(&db, "t"));
}

#[test]
fn test_delete_database_then_reopen_creates_again() {
    let (_dir, path) = temp_store();
    let log = HookLog::default();
    let helper = open_helper(&path, 1, 0, log.hooks());
    helper.writable_database().expect("create");
    helper.close().expect("close");

    assert!(Database::delete_database(&path).expect("delete"));
    log.take();
    open_helper(&path, 1, 0, log.hooks())
        .writable_database()
        .expect("create again");
    assert_eq!(log.take(), ["create", "open"]);
}
