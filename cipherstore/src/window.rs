//! Bounded staging buffer for a contiguous slice of result rows.
//!
//! # Layout
//!
//! All row data lives in one byte region. Allocation is append-only:
//!
//! ```text
//! data: | row 0 fields | payload | row 1 fields | payload | payload | ...
//! ```
//!
//! A row is `num_columns` field slots of [`FIELD_SLOT_SIZE`] bytes:
//!
//! ```text
//! | type: u32 LE | 8 bytes: i64 LE, f64 bits LE, or (offset: u32 LE, size: u32 LE) |
//! ```
//!
//! Strings and blobs store their bytes in a payload appended after the slot
//! directory and point at it by offset. Rows are located through
//! `row_offsets`, and a [`RowHandle`] is an index into it, never an address,
//! so growing the region can never leave a handle pointing at stale memory.
//! Every write resolves its field slot again after the payload has been
//! allocated.
//!
//! `capacity` is the logical byte limit. When an allocation does not fit,
//! the window grows to `max(capacity * 2, needed)`, bounded by
//! `max_capacity`; if it still does not fit the write reports `false` and
//! the caller decides what to do with the row.

use std::fmt;

use crate::closable::{NoHooks, RefCount, Released};
use crate::error::{DbError, DbResult};

/// Size in bytes of one field slot.
pub const FIELD_SLOT_SIZE: usize = 12;

const TAG_NULL: u32 = 0;
const TAG_INTEGER: u32 = 1;
const TAG_FLOAT: u32 = 2;
const TAG_STRING: u32 = 3;
const TAG_BLOB: u32 = 4;

/// Storage class of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Text.
    String,
    /// Binary blob.
    Blob,
}

impl FieldType {
    fn from_tag(tag: u32) -> DbResult<Self> {
        match tag {
            TAG_NULL => Ok(Self::Null),
            TAG_INTEGER => Ok(Self::Integer),
            TAG_FLOAT => Ok(Self::Float),
            TAG_STRING => Ok(Self::String),
            TAG_BLOB => Ok(Self::Blob),
            other => Err(DbError::Corrupt(format!("unknown field type tag {other}"))),
        }
    }
}

/// Stable identity of an allocated row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle(usize);

impl RowHandle {
    /// Row index relative to the window's start position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A window of result rows.
pub struct CursorWindow {
    data: Vec<u8>,
    capacity: usize,
    max_capacity: usize,
    row_offsets: Vec<u32>,
    num_columns: usize,
    start_position: usize,
    /// Row that owns every byte from its slot directory to the end of
    /// `data`. Only then can freeing it reclaim space.
    tail_row: Option<usize>,
    refs: RefCount,
}

impl CursorWindow {
    /// Creates an empty window with `initial_bytes` of capacity that may grow
    /// to `max_bytes`.
    #[must_use]
    pub fn new(initial_bytes: usize, max_bytes: usize) -> Self {
        let max_capacity = max_bytes
            .max(initial_bytes)
            .min(u32::MAX as usize);
        Self {
            data: Vec::new(),
            capacity: initial_bytes.min(max_capacity),
            max_capacity,
            row_offsets: Vec::new(),
            num_columns: 0,
            start_position: 0,
            tail_row: None,
            refs: RefCount::new(),
        }
    }

    /// Creates a window that never grows past `bytes`.
    #[must_use]
    pub fn with_fixed_size(bytes: usize) -> Self {
        Self::new(bytes, bytes)
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.refs.is_released() {
            Err(DbError::closed("cursor window"))
        } else {
            Ok(())
        }
    }

    /// Sets the number of columns.
    ///
    /// Returns `Ok(false)` if the window already has a different non-zero
    /// column count or holds rows; [`CursorWindow::clear`] resets it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed window.
    pub fn set_column_count(&mut self, columns: usize) -> DbResult<bool> {
        self.ensure_open()?;
        if columns == self.num_columns {
            return Ok(true);
        }
        if self.num_columns != 0 || !self.row_offsets.is_empty() {
            return Ok(false);
        }
        self.num_columns = columns;
        Ok(true)
    }

    /// Reserves `needed` more bytes, growing if allowed.
    fn ensure_space(&mut self, needed: usize) -> bool {
        let Some(required) = self.data.len().checked_add(needed) else {
            return false;
        };
        if required <= self.capacity {
            return true;
        }
        let grown = self
            .capacity
            .saturating_mul(2)
            .max(required)
            .min(self.max_capacity);
        if required > grown {
            return false;
        }
        self.capacity = grown;
        true
    }

    /// Appends `len` zeroed bytes and returns their offset.
    fn alloc(&mut self, len: usize) -> Option<u32> {
        if !self.ensure_space(len) {
            return None;
        }
        let offset = u32::try_from(self.data.len()).ok()?;
        self.data.resize(self.data.len() + len, 0);
        Some(offset)
    }

    /// Appends a row with every field set to NULL.
    ///
    /// Returns `Ok(None)` when the window is full.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::IllegalState`] if no column count was set and
    /// [`DbError::Closed`] on a closed window.
    pub fn allocate_row(&mut self) -> DbResult<Option<RowHandle>> {
        self.ensure_open()?;
        if self.num_columns == 0 {
            return Err(DbError::illegal_state(
                "the column count must be set before allocating rows",
            ));
        }
        let Some(offset) = self.alloc(self.num_columns * FIELD_SLOT_SIZE) else {
            return Ok(None);
        };
        let index = self.row_offsets.len();
        self.row_offsets.push(offset);
        self.tail_row = Some(index);
        Ok(Some(RowHandle(index)))
    }

    /// Removes the most recently allocated row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed window.
    pub fn free_last_row(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        let Some(offset) = self.row_offsets.pop() else {
            return Ok(());
        };
        if self.tail_row == Some(self.row_offsets.len()) {
            self.data.truncate(offset as usize);
        }
        self.tail_row = None;
        Ok(())
    }

    fn slot_offset(&self, row: RowHandle, column: usize) -> DbResult<usize> {
        let base = self.row_offsets.get(row.0).ok_or_else(|| {
            DbError::illegal_state(format!("row {} is not allocated in this window", row.0))
        })?;
        if column >= self.num_columns {
            return Err(DbError::ColumnOutOfBounds {
                column,
                count: self.num_columns,
            });
        }
        Ok(*base as usize + column * FIELD_SLOT_SIZE)
    }

    fn write_slot(&mut self, slot: usize, tag: u32, payload: [u8; 8]) {
        self.data[slot..slot + 4].copy_from_slice(&tag.to_le_bytes());
        self.data[slot + 4..slot + FIELD_SLOT_SIZE].copy_from_slice(&payload);
    }

    fn put_inline(
        &mut self,
        row: RowHandle,
        column: usize,
        tag: u32,
        payload: [u8; 8],
    ) -> DbResult<bool> {
        self.ensure_open()?;
        let slot = self.slot_offset(row, column)?;
        self.write_slot(slot, tag, payload);
        Ok(true)
    }

    fn put_bytes(
        &mut self,
        row: RowHandle,
        column: usize,
        tag: u32,
        bytes: &[u8],
    ) -> DbResult<bool> {
        self.ensure_open()?;
        // Validate before allocating so a bad handle does not leak space.
        self.slot_offset(row, column)?;
        let Ok(size) = u32::try_from(bytes.len()) else {
            return Ok(false);
        };
        let Some(offset) = self.alloc(bytes.len()) else {
            return Ok(false);
        };
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        if self.tail_row != Some(row.0) {
            self.tail_row = None;
        }
        // Resolve again: the allocation above may have grown the region.
        let slot = self.slot_offset(row, column)?;
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&offset.to_le_bytes());
        payload[4..].copy_from_slice(&size.to_le_bytes());
        self.write_slot(slot, tag, payload);
        Ok(true)
    }

    /// Stores NULL.
    ///
    /// # Errors
    ///
    /// Fails on a closed window, an unknown row, or a column out of range.
    pub fn put_null(&mut self, row: RowHandle, column: usize) -> DbResult<bool> {
        self.put_inline(row, column, TAG_NULL, [0; 8])
    }

    /// Stores an integer.
    ///
    /// # Errors
    ///
    /// Fails on a closed window, an unknown row, or a column out of range.
    pub fn put_long(&mut self, row: RowHandle, column: usize, value: i64) -> DbResult<bool> {
        self.put_inline(row, column, TAG_INTEGER, value.to_le_bytes())
    }

    /// Stores a float.
    ///
    /// # Errors
    ///
    /// Fails on a closed window, an unknown row, or a column out of range.
    pub fn put_double(&mut self, row: RowHandle, column: usize, value: f64) -> DbResult<bool> {
        self.put_inline(row, column, TAG_FLOAT, value.to_bits().to_le_bytes())
    }

    /// Stores text. Returns `Ok(false)` if it does not fit.
    ///
    /// # Errors
    ///
    /// Fails on a closed window, an unknown row, or a column out of range.
    pub fn put_string(&mut self, row: RowHandle, column: usize, value: &str) -> DbResult<bool> {
        self.put_bytes(row, column, TAG_STRING, value.as_bytes())
    }

    /// Stores text that the engine handed over as raw bytes.
    pub(crate) fn put_text_bytes(
        &mut self,
        row: RowHandle,
        column: usize,
        value: &[u8],
    ) -> DbResult<bool> {
        self.put_bytes(row, column, TAG_STRING, value)
    }

    /// Stores a blob. Returns `Ok(false)` if it does not fit.
    ///
    /// # Errors
    ///
    /// Fails on a closed window, an unknown row, or a column out of range.
    pub fn put_blob(&mut self, row: RowHandle, column: usize, value: &[u8]) -> DbResult<bool> {
        self.put_bytes(row, column, TAG_BLOB, value)
    }

    fn read_array<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[offset..offset + N]);
        out
    }

    /// Locates the slot of an absolute row position.
    fn field(&self, position: usize, column: usize) -> DbResult<(FieldType, usize)> {
        self.ensure_open()?;
        let end = self.start_position + self.row_offsets.len();
        if position < self.start_position || position >= end {
            return Err(DbError::OutOfBounds {
                index: i64::try_from(position).unwrap_or(i64::MAX),
                count: end,
            });
        }
        let slot = self.slot_offset(RowHandle(position - self.start_position), column)?;
        let tag = u32::from_le_bytes(self.read_array(slot));
        Ok((FieldType::from_tag(tag)?, slot))
    }

    fn payload(&self, slot: usize) -> &[u8] {
        let offset = u32::from_le_bytes(self.read_array(slot + 4)) as usize;
        let size = u32::from_le_bytes(self.read_array(slot + 8)) as usize;
        &self.data[offset..offset + size]
    }

    fn inline_i64(&self, slot: usize) -> i64 {
        i64::from_le_bytes(self.read_array(slot + 4))
    }

    fn inline_f64(&self, slot: usize) -> f64 {
        f64::from_bits(u64::from_le_bytes(self.read_array(slot + 4)))
    }

    /// Returns the storage class of a cell at an absolute row position.
    ///
    /// # Errors
    ///
    /// Fails on a closed window or a position outside the window.
    pub fn get_type(&self, position: usize, column: usize) -> DbResult<FieldType> {
        self.field(position, column).map(|(kind, _)| kind)
    }

    /// Returns `true` if the cell is NULL.
    ///
    /// # Errors
    ///
    /// Fails on a closed window or a position outside the window.
    pub fn is_null(&self, position: usize, column: usize) -> DbResult<bool> {
        Ok(self.get_type(position, column)? == FieldType::Null)
    }

    /// Reads a cell as an integer. Text is parsed (0 if it is not a number),
    /// NULL reads as 0, floats are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TypeMismatch`] for blobs.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_long(&self, position: usize, column: usize) -> DbResult<i64> {
        let (kind, slot) = self.field(position, column)?;
        match kind {
            FieldType::Integer => Ok(self.inline_i64(slot)),
            FieldType::Float => Ok(self.inline_f64(slot) as i64),
            FieldType::String => Ok(parse_long(&String::from_utf8_lossy(self.payload(slot)))),
            FieldType::Null => Ok(0),
            FieldType::Blob => Err(DbError::TypeMismatch(
                "unable to convert BLOB to long".to_string(),
            )),
        }
    }

    /// Reads a cell as a float. Text is parsed (0.0 if it is not a number),
    /// NULL reads as 0.0.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TypeMismatch`] for blobs.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_double(&self, position: usize, column: usize) -> DbResult<f64> {
        let (kind, slot) = self.field(position, column)?;
        match kind {
            FieldType::Float => Ok(self.inline_f64(slot)),
            FieldType::Integer => Ok(self.inline_i64(slot) as f64),
            FieldType::String => Ok(String::from_utf8_lossy(self.payload(slot))
                .trim()
                .parse()
                .unwrap_or(0.0)),
            FieldType::Null => Ok(0.0),
            FieldType::Blob => Err(DbError::TypeMismatch(
                "unable to convert BLOB to double".to_string(),
            )),
        }
    }

    /// Reads a cell as text. Numbers are formatted, NULL reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TypeMismatch`] for blobs.
    pub fn get_string(&self, position: usize, column: usize) -> DbResult<Option<String>> {
        let (kind, slot) = self.field(position, column)?;
        match kind {
            FieldType::String => Ok(Some(
                String::from_utf8_lossy(self.payload(slot)).into_owned(),
            )),
            FieldType::Integer => Ok(Some(self.inline_i64(slot).to_string())),
            FieldType::Float => Ok(Some(self.inline_f64(slot).to_string())),
            FieldType::Null => Ok(None),
            FieldType::Blob => Err(DbError::TypeMismatch(
                "unable to convert BLOB to string".to_string(),
            )),
        }
    }

    /// Reads a blob cell. NULL reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TypeMismatch`] for numeric and text cells.
    pub fn get_blob(&self, position: usize, column: usize) -> DbResult<Option<Vec<u8>>> {
        let (kind, slot) = self.field(position, column)?;
        match kind {
            FieldType::Blob => Ok(Some(self.payload(slot).to_vec())),
            FieldType::Null => Ok(None),
            other => Err(DbError::TypeMismatch(format!(
                "unable to read a {other:?} cell as a blob"
            ))),
        }
    }

    /// Drops every row and the column count; capacity is kept.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed window.
    pub fn clear(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        self.data.clear();
        self.row_offsets.clear();
        self.num_columns = 0;
        self.start_position = 0;
        self.tail_row = None;
        Ok(())
    }

    /// Absolute result-set position of the first row.
    #[must_use]
    pub const fn start_position(&self) -> usize {
        self.start_position
    }

    /// Sets the absolute position of the first row.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] on a closed window.
    pub fn set_start_position(&mut self, position: usize) -> DbResult<()> {
        self.ensure_open()?;
        self.start_position = position;
        Ok(())
    }

    /// Number of rows held.
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.row_offsets.len()
    }

    /// Number of columns per row.
    #[must_use]
    pub const fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns `true` if the absolute `position` is held by this window.
    #[must_use]
    pub const fn contains(&self, position: usize) -> bool {
        position >= self.start_position && position < self.start_position + self.num_rows()
    }

    /// Bytes left before the window has to grow.
    #[must_use]
    pub const fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.data.len())
    }

    /// Current logical capacity in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity the window may grow to.
    #[must_use]
    pub const fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Takes an additional reference that must be balanced by [`CursorWindow::close`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Closed`] once the window was torn down.
    pub fn acquire_reference(&self) -> DbResult<()> {
        self.refs.acquire("cursor window")
    }

    /// Releases a reference. The storage is freed with the last one.
    pub fn close(&mut self) {
        if self.refs.release(&NoHooks) == Released::ByHolder {
            self.data = Vec::new();
            self.row_offsets = Vec::new();
            self.num_columns = 0;
            self.tail_row = None;
        }
    }

    /// Returns `true` once every reference was released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.refs.is_released()
    }
}

/// Parses the leading integer of `text`, falling back to a float and then 0.
#[allow(clippy::cast_possible_truncation)]
fn parse_long(text: &str) -> i64 {
    let text = text.trim();
    text.parse::<i64>()
        .or_else(|_| text.parse::<f64>().map(|v| v as i64))
        .unwrap_or(0)
}

impl fmt::Debug for CursorWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorWindow")
            .field("start_position", &self.start_position)
            .field("num_rows", &self.row_offsets.len())
            .field("num_columns", &self.num_columns)
            .field("used", &self.data.len())
            .field("capacity", &self.capacity)
            .field("max_capacity", &self.max_capacity)
            .field("closed", &self.refs.is_released())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
