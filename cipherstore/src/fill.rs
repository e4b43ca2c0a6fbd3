//! Copies query results into a [`CursorWindow`].

use rusqlite::params_from_iter;
use rusqlite::types::ValueRef;

use crate::cancel::attach_optional;
use crate::connection::Connection;
use crate::cursor::QuerySpec;
use crate::error::{DbError, DbResult};
use crate::logger::LogSink;
use crate::window::CursorWindow;

/// Outcome of one fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillResult {
    /// Absolute position of the window's first row.
    pub start_position: usize,
    /// Rows stepped through. Equals the result-set size when counting all rows.
    pub total_rows: usize,
    /// Rows copied into the window.
    pub added_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyRow {
    Copied,
    Full,
}

/// Runs `query` and copies rows into `window`, starting at `start`.
///
/// If the window fills up before `required` was copied, it is cleared and
/// filling restarts at the current row, so `required` always ends up in the
/// window. With `count_all` the statement is stepped to completion after the
/// window is full so `total_rows` is the size of the result set.
pub fn fill_window(
    conn: &Connection,
    query: &QuerySpec,
    window: &mut CursorWindow,
    start: usize,
    required: usize,
    count_all: bool,
    log: &LogSink,
) -> DbResult<FillResult> {
    let signal = query.cancellation.as_ref();
    let _interrupt = attach_optional(signal, || conn.interrupt_handle())?;

    let mut stmt = conn.raw().prepare_cached(&query.sql)?;
    let num_columns = stmt.column_count();
    window.clear()?;
    window.set_start_position(start)?;
    window.set_column_count(num_columns)?;

    let mut rows = stmt.query(params_from_iter(query.args.iter()))?;
    let mut start_position = start;
    let mut total_rows = 0usize;
    let mut added_rows = 0usize;
    let mut window_full = false;

    while !window_full || count_all {
        if let Some(signal) = signal {
            signal.throw_if_canceled()?;
        }
        let Some(row) = rows.next()? else {
            break;
        };
        total_rows += 1;
        if start_position >= total_rows || window_full {
            continue;
        }

        let mut copied = copy_row(window, row, num_columns)?;
        if copied == CopyRow::Full && added_rows > 0 && start_position + added_rows <= required {
            // Filled up before reaching the row that was asked for.
            window.clear()?;
            window.set_column_count(num_columns)?;
            start_position += added_rows;
            window.set_start_position(start_position)?;
            added_rows = 0;
            copied = copy_row(window, row, num_columns)?;
        }
        match copied {
            CopyRow::Copied => added_rows += 1,
            CopyRow::Full => window_full = true,
        }
    }

    if window_full && added_rows == 0 {
        return Err(DbError::WindowAllocation(format!(
            "row too big to fit into the cursor window: \
             required_pos={required}, total_rows={total_rows}"
        )));
    }

    log.debug(format_args!(
        "filled window: start={start_position}, rows={added_rows}, stepped={total_rows}, \
         required={required}, count_all={count_all}"
    ));
    Ok(FillResult {
        start_position,
        total_rows,
        added_rows,
    })
}

/// Copies one row. A row that does not fit is rolled back entirely.
fn copy_row(
    window: &mut CursorWindow,
    row: &rusqlite::Row<'_>,
    num_columns: usize,
) -> DbResult<CopyRow> {
    let Some(handle) = window.allocate_row()? else {
        return Ok(CopyRow::Full);
    };
    for column in 0..num_columns {
        let fit = match row.get_ref(column)? {
            ValueRef::Null => window.put_null(handle, column)?,
            ValueRef::Integer(v) => window.put_long(handle, column, v)?,
            ValueRef::Real(v) => window.put_double(handle, column, v)?,
            ValueRef::Text(bytes) => window.put_text_bytes(handle, column, bytes)?,
            ValueRef::Blob(bytes) => window.put_blob(handle, column, bytes)?,
        };
        if !fit {
            window.free_last_row()?;
            return Ok(CopyRow::Full);
        }
    }
    Ok(CopyRow::Copied)
}
