//! The engine side of the native boundary.
//!
//! Every entry point keeps a C-style shape: raw handle pointers, `c_int`
//! status codes (`0` is success), out-parameters for results, and
//! engine-allocated NUL-terminated error messages that the caller must
//! release through [`free_text`]. Handles are written to their
//! out-parameter only on success.
//!
//! The implementation runs on SQLite through the manual bindings in
//! [`crate::ffi`].

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_safety_doc)]

mod conn;
mod db;
mod params;
mod rows;
mod stmt;
mod txn;

pub use conn::{
    EngineConn, begin_transaction, changes, disconnect, execute, execute_named,
    execute_positional, last_insert_rowid, load_extension, prepare, query, query_named,
    query_positional, reset_connection,
};
pub use db::{EngineConfig, EngineDb, EngineReplicated, close, connect, open_file, open_remote,
    open_sync_with_config, sync};
pub use params::{
    NamedSet, PositionalSet, alloc_named, alloc_positional, free_named, free_positional,
    named_bind_blob, named_bind_float, named_bind_int, named_bind_null, named_bind_text,
    positional_bind_blob, positional_bind_float, positional_bind_int, positional_bind_null,
    positional_bind_text,
};
pub use rows::{
    EngineRow, EngineRows, column_count, column_name, column_type, free_row, free_rows, next_row,
    row_get_blob, row_get_float, row_get_int, row_get_text,
};
pub use stmt::{
    EngineStmt, finalize_stmt, stmt_execute, stmt_execute_named, stmt_execute_positional,
    stmt_query, stmt_query_named, stmt_query_positional, stmt_reset, stmt_run, stmt_run_named,
    stmt_run_positional,
};
pub use txn::{
    EngineTxn, TRANSACTION_DEFERRED, TRANSACTION_EXCLUSIVE, TRANSACTION_IMMEDIATE,
    TRANSACTION_READONLY, commit_transaction, free_transaction, rollback_transaction,
    transaction_connection,
};

use crate::ffi;
use std::ffi::{CStr, CString, c_char, c_int};

/// A blob crossing the boundary. The memory is engine-allocated and must be
/// released through [`free_blob`], never through [`free_text`].
#[repr(C)]
#[derive(Debug)]
pub struct EngineBlob {
    pub ptr: *mut u8,
    pub len: c_int,
}

impl EngineBlob {
    pub const fn empty() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            len: 0,
        }
    }
}

/// Release an engine-allocated blob. Null pointers are ignored.
pub unsafe fn free_blob(b: EngineBlob) {
    if !b.ptr.is_null() {
        // SAFETY: the pointer came from a leaked boxed slice of exactly len bytes
        unsafe {
            let slice = std::slice::from_raw_parts_mut(b.ptr, b.len as usize);
            let _ = Box::from_raw(slice);
        }
    }
}

/// Release an engine-allocated string (error messages, column names, text
/// values). Null pointers are ignored.
pub unsafe fn free_text(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: the pointer came from CString::into_raw
        let _ = unsafe { CString::from_raw(ptr) };
    }
}

/// Turn an owned string into an engine-allocated C string. Interior NULs
/// yield a null pointer rather than a panic.
pub(crate) fn translate_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Write an error message to the out-parameter when one was supplied.
pub(crate) unsafe fn set_err_msg(msg: String, output: *mut *mut c_char) {
    if !output.is_null() {
        // SAFETY: caller supplied a valid out-parameter
        unsafe {
            *output = translate_string(msg);
        }
    }
}

/// Read libsqlite3's current error message for a connection.
pub(crate) unsafe fn db_error(db: *mut ffi::sqlite3) -> String {
    // SAFETY: sqlite3_errmsg returns a valid C string for a live handle
    unsafe {
        CStr::from_ptr(ffi::sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned()
    }
}

/// Prepare a statement, reporting libsqlite3's message on failure.
pub(crate) unsafe fn prepare_raw(
    db: *mut ffi::sqlite3,
    sql: &CStr,
) -> Result<*mut ffi::sqlite3_stmt, String> {
    let mut stmt: *mut ffi::sqlite3_stmt = std::ptr::null_mut();
    // SAFETY: db is a live handle, sql is NUL-terminated
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            sql.as_ptr(),
            sql.to_bytes().len() as c_int,
            &mut stmt,
            std::ptr::null_mut(),
        )
    };
    if rc != ffi::SQLITE_OK {
        return Err(unsafe { db_error(db) });
    }
    Ok(stmt)
}

/// Run a parameterless SQL string to completion.
pub(crate) unsafe fn exec(db: *mut ffi::sqlite3, sql: &CStr) -> Result<(), String> {
    let mut errmsg: *mut c_char = std::ptr::null_mut();
    // SAFETY: db is a live handle, sql is NUL-terminated
    let rc = unsafe {
        ffi::sqlite3_exec(db, sql.as_ptr(), None, std::ptr::null_mut(), &mut errmsg)
    };
    if rc != ffi::SQLITE_OK {
        let msg = if errmsg.is_null() {
            ffi::error_string(rc).to_string()
        } else {
            // SAFETY: sqlite allocated errmsg; it must be freed with sqlite3_free
            unsafe {
                let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                ffi::sqlite3_free(errmsg.cast());
                msg
            }
        };
        return Err(msg);
    }
    Ok(())
}
