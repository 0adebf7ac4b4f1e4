//! Result cursors and row value access.
//!
//! A cursor is lazy and forward-only: `next_row` takes one step and
//! materializes one row. Exhaustion is reported as success with a null row,
//! and stays that way on further calls. Typed getters fail with a type
//! mismatch error rather than coercing.

use super::{EngineBlob, db_error, set_err_msg, translate_string};
use crate::ffi;
use replidb_core::{Value, ValueType};
use std::ffi::{CStr, c_char, c_int};

/// A forward-only cursor over query results.
///
/// Cursors from ad-hoc queries own their statement and finalize it on free.
/// Cursors from a prepared statement borrow it, so the statement survives
/// the cursor and can be queried again.
pub struct EngineRows {
    stmt: *mut ffi::sqlite3_stmt,
    db: *mut ffi::sqlite3,
    owns_stmt: bool,
    done: bool,
    column_count: c_int,
}

// SAFETY: the handle is used from one place at a time.
unsafe impl Send for EngineRows {}

impl EngineRows {
    pub(crate) fn new(stmt: *mut ffi::sqlite3_stmt, db: *mut ffi::sqlite3, owns_stmt: bool) -> Self {
        // SAFETY: stmt is a live prepared statement
        let column_count = unsafe { ffi::sqlite3_column_count(stmt) };
        Self {
            stmt,
            db,
            owns_stmt,
            done: false,
            column_count,
        }
    }
}

impl Drop for EngineRows {
    fn drop(&mut self) {
        if self.owns_stmt && !self.stmt.is_null() {
            // SAFETY: an owning cursor finalizes its statement exactly once
            unsafe {
                ffi::sqlite3_finalize(self.stmt);
            }
        }
        self.stmt = std::ptr::null_mut();
    }
}

/// One materialized row. Values are copied out of the statement when the
/// row is produced, so the row stays valid after the cursor advances.
pub struct EngineRow {
    values: Vec<Value>,
}

impl EngineRow {
    fn get(&self, col: c_int) -> Option<&Value> {
        if col < 0 {
            return None;
        }
        self.values.get(col as usize)
    }
}

/// Copy a single result column out of the statement.
unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, col: c_int) -> Value {
    // SAFETY: stmt has a current row, col is within the column count
    unsafe {
        match ffi::sqlite3_column_type(stmt, col) {
            ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(stmt, col)),
            ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(stmt, col)),
            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, col);
                if ptr.is_null() {
                    Value::Null
                } else {
                    Value::Text(CStr::from_ptr(ptr).to_string_lossy().into_owned())
                }
            }
            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, col);
                let len = ffi::sqlite3_column_bytes(stmt, col);
                if ptr.is_null() || len <= 0 {
                    Value::Blob(Vec::new())
                } else {
                    Value::Blob(std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize).to_vec())
                }
            }
            _ => Value::Null,
        }
    }
}

/// Number of columns in the result set.
pub unsafe fn column_count(rows: *const EngineRows) -> c_int {
    // SAFETY: rows came from a query entry point and is still live
    unsafe { (*rows).column_count }
}

/// Name of a result column. The returned string is released with free_text.
pub unsafe fn column_name(
    rows: *const EngineRows,
    col: c_int,
    out_name: *mut *mut c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: rows came from a query entry point and is still live
    let cursor = unsafe { &*rows };
    if col < 0 || col >= cursor.column_count {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(format!("column index out of range: {col}"), out_err) };
        return 2;
    }
    // SAFETY: col was bounds-checked against the statement's column count
    let name = unsafe { ffi::sqlite3_column_name(cursor.stmt, col) };
    if name.is_null() {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(format!("no name for column {col}"), out_err) };
        return 2;
    }
    // SAFETY: sqlite3_column_name returns a valid C string
    let owned = unsafe { CStr::from_ptr(name).to_string_lossy().into_owned() };
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_name = translate_string(owned);
    }
    0
}

/// Storage class of a value in a materialized row.
pub unsafe fn column_type(
    rows: *const EngineRows,
    row: *const EngineRow,
    col: c_int,
    out_type: *mut c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: rows and row came from this cursor and are still live
    let (cursor, row) = unsafe { (&*rows, &*row) };
    if col < 0 || col >= cursor.column_count {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(format!("column index out of range: {col}"), out_err) };
        return 2;
    }
    let ty = match row.get(col) {
        Some(value) => value.value_type(),
        None => ValueType::Null,
    };
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_type = ty.code();
    }
    0
}

/// Produce the next row, or a null row once the cursor is exhausted.
pub unsafe fn next_row(
    rows: *mut EngineRows,
    out_row: *mut *mut EngineRow,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: rows came from a query entry point and is still live
    let cursor = unsafe { &mut *rows };
    if cursor.done {
        // SAFETY: caller supplied a valid out-parameter
        unsafe {
            *out_row = std::ptr::null_mut();
        }
        return 0;
    }
    // SAFETY: the statement is live until the cursor is freed
    match unsafe { ffi::sqlite3_step(cursor.stmt) } {
        ffi::SQLITE_ROW => {
            let values = (0..cursor.column_count)
                // SAFETY: the statement has a current row
                .map(|col| unsafe { read_column(cursor.stmt, col) })
                .collect();
            let row = Box::new(EngineRow { values });
            // SAFETY: caller supplied a valid out-parameter
            unsafe {
                *out_row = Box::into_raw(row);
            }
            0
        }
        ffi::SQLITE_DONE => {
            cursor.done = true;
            // SAFETY: caller supplied a valid out-parameter
            unsafe {
                *out_row = std::ptr::null_mut();
            }
            0
        }
        _ => {
            cursor.done = true;
            // SAFETY: db carries the step error
            let msg = unsafe { db_error(cursor.db) };
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(msg, out_err) };
            1
        }
    }
}

/// Release a cursor. Null is a no-op.
pub unsafe fn free_rows(rows: *mut EngineRows) {
    if !rows.is_null() {
        // SAFETY: the pointer came from a query entry point
        let _ = unsafe { Box::from_raw(rows) };
    }
}

/// Release a row. Null is a no-op.
pub unsafe fn free_row(row: *mut EngineRow) {
    if !row.is_null() {
        // SAFETY: the pointer came from next_row
        let _ = unsafe { Box::from_raw(row) };
    }
}

unsafe fn fetch<'a>(
    row: *const EngineRow,
    col: c_int,
    out_err: *mut *mut c_char,
) -> Result<&'a Value, c_int> {
    // SAFETY: row came from next_row and is still live
    match unsafe { (*row).get(col) } {
        Some(value) => Ok(value),
        None => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(format!("column index out of range: {col}"), out_err) };
            Err(2)
        }
    }
}

pub unsafe fn row_get_int(
    row: *const EngineRow,
    col: c_int,
    out_value: *mut i64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let value = match unsafe { fetch(row, col, out_err) } {
        Ok(value) => value,
        Err(status) => return status,
    };
    let Value::Integer(v) = value else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("Value not an integer".to_string(), out_err) };
        return 1;
    };
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_value = *v;
    }
    0
}

pub unsafe fn row_get_float(
    row: *const EngineRow,
    col: c_int,
    out_value: *mut f64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let value = match unsafe { fetch(row, col, out_err) } {
        Ok(value) => value,
        Err(status) => return status,
    };
    let Value::Real(v) = value else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("Value not a float".to_string(), out_err) };
        return 1;
    };
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_value = *v;
    }
    0
}

/// Fetch a text value. The returned string is released with free_text.
pub unsafe fn row_get_text(
    row: *const EngineRow,
    col: c_int,
    out_value: *mut *mut c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let value = match unsafe { fetch(row, col, out_err) } {
        Ok(value) => value,
        Err(status) => return status,
    };
    let Value::Text(s) = value else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("Value not a string".to_string(), out_err) };
        return 1;
    };
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_value = translate_string(s.clone());
    }
    0
}

/// Fetch a blob value. The returned buffer is released with free_blob.
pub unsafe fn row_get_blob(
    row: *const EngineRow,
    col: c_int,
    out_value: *mut EngineBlob,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let value = match unsafe { fetch(row, col, out_err) } {
        Ok(value) => value,
        Err(status) => return status,
    };
    let Value::Blob(bytes) = value else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("Value not a blob".to_string(), out_err) };
        return 1;
    };
    let blob = if bytes.is_empty() {
        EngineBlob::empty()
    } else {
        let boxed = bytes.clone().into_boxed_slice();
        let len = boxed.len() as c_int;
        EngineBlob {
            ptr: Box::into_raw(boxed).cast::<u8>(),
            len,
        }
    };
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_value = blob;
    }
    0
}
