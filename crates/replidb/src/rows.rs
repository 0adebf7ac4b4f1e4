//! Result cursors, rows, and blob values.

use crate::engine;
use crate::handle::NativeHandle;
use crate::native::{check, take_text};
use replidb_core::{CursorError, Cx, Error, NativeError, Outcome, Result, ValueType};
use std::ffi::{c_char, c_int};
use std::marker::PhantomData;

/// A lazy, forward-only cursor over query results.
///
/// Rows are produced one at a time by [`Rows::next`]; exhaustion is `None`
/// and stays `None`. The cursor handle is released on [`Rows::free`] or
/// drop, exactly once either way.
///
/// The lifetime ties the cursor to whatever produced it. A cursor from
/// [`crate::Statement::query`] borrows the statement, so the statement
/// cannot be finalized or dropped while the cursor is alive.
pub struct Rows<'source> {
    handle: NativeHandle<engine::EngineRows>,
    _source: PhantomData<&'source ()>,
}

impl Rows<'_> {
    pub(crate) fn new(ptr: *mut engine::EngineRows) -> Self {
        Self {
            handle: NativeHandle::owned(ptr, engine::free_rows),
            _source: PhantomData,
        }
    }

    fn live(&self) -> Result<*mut engine::EngineRows> {
        if self.handle.is_released() {
            return Err(Error::Cursor(CursorError::released()));
        }
        Ok(self.handle.as_ptr())
    }

    /// Number of columns in the result set.
    pub fn column_count(&self) -> Result<i32> {
        let rows = self.live()?;
        // SAFETY: rows is live
        Ok(unsafe { engine::column_count(rows) })
    }

    /// Name of a result column.
    pub fn column_name(&self, col: i32) -> Result<String> {
        let rows = self.live()?;
        let mut name: *mut c_char = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: rows is live, out-parameters point at locals
        let status = unsafe { engine::column_name(rows, col, &mut name, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        // SAFETY: the engine allocated name on success
        unsafe { take_text(name) }.ok_or_else(|| {
            Error::Native(NativeError::from_status(2, Some(format!("no name for column {col}"))))
        })
    }

    /// Storage class of a value in a row produced by this cursor.
    pub fn column_type(&self, row: &Row, col: i32) -> Result<ValueType> {
        let rows = self.live()?;
        let row_ptr = row.live()?;
        let mut code: c_int = 0;
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: both handles are live, out-parameters point at locals
        let status = unsafe { engine::column_type(rows, row_ptr, col, &mut code, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(ValueType::from_code(code))
    }

    /// Advance the cursor. `None` means exhausted.
    pub fn next_sync(&mut self) -> Result<Option<Row>> {
        let rows = self.live()?;
        let mut row: *mut engine::EngineRow = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: rows is live, out-parameters point at locals
        let status = unsafe { engine::next_row(rows, &mut row, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        if row.is_null() {
            Ok(None)
        } else {
            Ok(Some(Row::new(row)))
        }
    }

    /// Advance the cursor. `None` means exhausted.
    pub fn next(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let result = self.next_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Release the cursor. Safe to call more than once.
    pub fn free(&mut self) {
        self.handle.release();
    }
}

/// One materialized row. Stays valid after the cursor advances or is freed.
pub struct Row {
    handle: NativeHandle<engine::EngineRow>,
}

impl Row {
    pub(crate) fn new(ptr: *mut engine::EngineRow) -> Self {
        Self {
            handle: NativeHandle::owned(ptr, engine::free_row),
        }
    }

    fn live(&self) -> Result<*mut engine::EngineRow> {
        if self.handle.is_released() {
            return Err(Error::Cursor(CursorError::new("row has been released")));
        }
        Ok(self.handle.as_ptr())
    }

    /// Fetch an INTEGER column. Any other storage class is an error.
    pub fn get_int(&self, col: i32) -> Result<i64> {
        let row = self.live()?;
        let mut value = 0i64;
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: row is live, out-parameters point at locals
        let status = unsafe { engine::row_get_int(row, col, &mut value, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(value)
    }

    /// Fetch a REAL column. Any other storage class is an error.
    pub fn get_float(&self, col: i32) -> Result<f64> {
        let row = self.live()?;
        let mut value = 0f64;
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: row is live, out-parameters point at locals
        let status = unsafe { engine::row_get_float(row, col, &mut value, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(value)
    }

    /// Fetch a TEXT column. Any other storage class is an error.
    pub fn get_text(&self, col: i32) -> Result<String> {
        let row = self.live()?;
        let mut value: *mut c_char = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: row is live, out-parameters point at locals
        let status = unsafe { engine::row_get_text(row, col, &mut value, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        // SAFETY: the engine allocated value on success
        unsafe { take_text(value) }.ok_or_else(|| {
            Error::Native(NativeError::from_status(1, Some("text value was null".to_string())))
        })
    }

    /// Fetch a BLOB column. Any other storage class is an error.
    pub fn get_blob(&self, col: i32) -> Result<Blob> {
        let row = self.live()?;
        let mut value = engine::EngineBlob::empty();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: row is live, out-parameters point at locals
        let status = unsafe { engine::row_get_blob(row, col, &mut value, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(Blob::new(value))
    }

    /// Release the row. Safe to call more than once.
    pub fn free(&mut self) {
        self.handle.release();
    }
}

/// An owned blob crossing the boundary in `{ptr, len}` form. The buffer is
/// released exactly once, through the blob-free entry point, on drop.
pub struct Blob {
    raw: engine::EngineBlob,
    released: bool,
}

// SAFETY: the buffer is owned by this value and used from one place at a time.
unsafe impl Send for Blob {}

impl Blob {
    fn new(raw: engine::EngineBlob) -> Self {
        Self {
            raw,
            released: false,
        }
    }

    pub fn len(&self) -> usize {
        if self.released || self.raw.ptr.is_null() {
            0
        } else {
            self.raw.len.max(0) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.is_empty() {
            return &[];
        }
        // SAFETY: ptr and len describe a live engine-allocated buffer
        unsafe { std::slice::from_raw_parts(self.raw.ptr, self.raw.len as usize) }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            // SAFETY: the buffer came from the engine and is freed once
            unsafe {
                engine::free_blob(std::mem::replace(
                    &mut self.raw,
                    engine::EngineBlob::empty(),
                ));
            }
        }
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").field("len", &self.len()).finish()
    }
}
