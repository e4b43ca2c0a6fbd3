//! Unit tests for the cursor window layout.

use super::*;

fn two_column_window(initial: usize, max: usize) -> CursorWindow {
    let mut window = CursorWindow::new(initial, max);
    assert!(window.set_column_count(2).expect("columns"));
    window
}

#[test]
fn test_fixed_window_holds_exact_number_of_rows() {
    let mut window = two_column_window(144, 144);
    for i in 0..6 {
        let row = window.allocate_row().expect("alloc").expect("fits");
        assert!(window.put_long(row, 0, i).expect("put"));
        assert!(window.put_long(row, 1, i * 10).expect("put"));
    }
    assert_eq!(window.free_space(), 0);
    assert!(window.allocate_row().expect("alloc").is_none());
    assert_eq!(window.num_rows(), 6);
    assert_eq!(window.get_long(5, 1).expect("read"), 50);
}

#[test]
fn test_row_handle_survives_growth_from_another_row() {
    let mut window = two_column_window(48, 4096);
    let first = window.allocate_row().expect("alloc").expect("fits");
    assert!(window.put_long(first, 0, 7).expect("put"));
    assert!(window.put_string(first, 1, "ab").expect("put"));

    let second = window.allocate_row().expect("alloc").expect("fits");
    let large = vec![0x5A_u8; 600];
    assert!(window.put_blob(second, 1, &large).expect("put"));
    assert!(window.capacity() > 48);

    // A later write through the first handle still lands in the first row.
    assert!(window.put_double(first, 0, 1.5).expect("put"));

    assert_eq!(window.get_double(0, 0).expect("read"), 1.5);
    assert_eq!(window.get_string(0, 1).expect("read").as_deref(), Some("ab"));
    assert_eq!(window.get_blob(1, 1).expect("read"), Some(large));
    assert!(window.is_null(1, 0).expect("read"));
}

#[test]
fn test_growth_is_bounded_by_max_capacity() {
    let mut window = two_column_window(32, 64);
    let row = window.allocate_row().expect("alloc").expect("fits");
    assert!(!window.put_blob(row, 0, &[1; 100]).expect("put"));
    assert!(window.put_blob(row, 0, &[1; 40]).expect("put"));
    assert_eq!(window.capacity(), 64);
}

#[test]
fn test_growth_covers_the_whole_shortfall() {
    let mut window = two_column_window(32, 10_000);
    let row = window.allocate_row().expect("alloc").expect("fits");
    assert!(window.put_blob(row, 0, &[9; 1000]).expect("put"));
    assert!(window.capacity() >= 24 + 1000);
}

#[test]
fn test_free_last_row_reclaims_its_space() {
    let mut window = two_column_window(1024, 1024);
    let first = window.allocate_row().expect("alloc").expect("fits");
    window.put_long(first, 0, 1).expect("put");
    let before = window.free_space();
    let second = window.allocate_row().expect("alloc").expect("fits");
    window.put_string(second, 0, "partial").expect("put");
    window.free_last_row().expect("free");
    assert_eq!(window.num_rows(), 1);
    assert_eq!(window.free_space(), before);
    assert_eq!(window.get_long(0, 0).expect("read"), 1);
}

#[test]
fn test_free_last_row_keeps_earlier_payloads() {
    let mut window = two_column_window(1024, 1024);
    let first = window.allocate_row().expect("alloc").expect("fits");
    window.allocate_row().expect("alloc").expect("fits");
    window.put_string(first, 1, "kept").expect("put");
    window.free_last_row().expect("free");
    assert_eq!(window.get_string(0, 1).expect("read").as_deref(), Some("kept"));
}

#[test]
fn test_column_count_is_fixed_until_clear() {
    let mut window = CursorWindow::new(256, 256);
    assert!(matches!(
        window.allocate_row(),
        Err(DbError::IllegalState(_))
    ));
    assert!(window.set_column_count(3).expect("set"));
    assert!(window.set_column_count(3).expect("same count"));
    assert!(!window.set_column_count(4).expect("different count"));
    window.clear().expect("clear");
    assert!(window.set_column_count(4).expect("after clear"));
}

#[test]
fn test_type_coercion_on_read() {
    let mut window = two_column_window(512, 512);
    let row = window.allocate_row().expect("alloc").expect("fits");
    window.put_string(row, 0, " 42 ").expect("put");
    window.put_null(row, 1).expect("put");
    assert_eq!(window.get_long(0, 0).expect("parse"), 42);
    assert_eq!(window.get_double(0, 0).expect("parse"), 42.0);
    assert_eq!(window.get_long(0, 1).expect("null"), 0);
    assert_eq!(window.get_string(0, 1).expect("null"), None);
    assert_eq!(window.get_blob(0, 1).expect("null"), None);
    assert!(matches!(window.get_blob(0, 0), Err(DbError::TypeMismatch(_))));

    let row = window.allocate_row().expect("alloc").expect("fits");
    window.put_string(row, 0, "not a number").expect("put");
    window.put_blob(row, 1, &[1, 2]).expect("put");
    assert_eq!(window.get_long(1, 0).expect("parse"), 0);
    assert!(matches!(window.get_long(1, 1), Err(DbError::TypeMismatch(_))));
    assert!(matches!(window.get_string(1, 1), Err(DbError::TypeMismatch(_))));
    assert_eq!(window.get_type(1, 1).expect("type"), FieldType::Blob);
}

#[test]
fn test_reads_use_absolute_positions() {
    let mut window = two_column_window(512, 512);
    window.set_start_position(10).expect("start");
    let row = window.allocate_row().expect("alloc").expect("fits");
    window.put_long(row, 0, 99).expect("put");
    assert!(window.contains(10));
    assert!(!window.contains(11));
    assert_eq!(window.get_long(10, 0).expect("read"), 99);
    assert!(matches!(
        window.get_long(9, 0),
        Err(DbError::OutOfBounds { index: 9, .. })
    ));
    assert!(matches!(
        window.get_long(10, 2),
        Err(DbError::ColumnOutOfBounds { column: 2, count: 2 })
    ));
}

#[test]
fn test_close_is_reference_counted() {
    let mut window = two_column_window(256, 256);
    window.acquire_reference().expect("acquire");
    window.close();
    assert!(!window.is_closed());
    window.allocate_row().expect("still open");
    window.close();
    assert!(window.is_closed());
    assert!(matches!(window.allocate_row(), Err(DbError::Closed(_))));
    assert!(matches!(window.get_long(0, 0), Err(DbError::Closed(_))));
}
