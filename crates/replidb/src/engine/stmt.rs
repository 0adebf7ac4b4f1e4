//! Prepared statement entry points.
//!
//! Statements rewind before every invocation but keep their bindings, so a
//! value bound once stays bound across calls until `stmt_reset` clears it
//! or a later call binds over it. `stmt_reset` rewinds and clears both.

use super::params::{NamedSet, PositionalSet, apply_named, apply_positional};
use super::rows::EngineRows;
use super::{db_error, set_err_msg};
use crate::ffi;
use std::ffi::{c_char, c_int};

/// A prepared statement. Owns the library statement handle and finalizes it
/// exactly once.
pub struct EngineStmt {
    pub(crate) stmt: *mut ffi::sqlite3_stmt,
    pub(crate) db: *mut ffi::sqlite3,
}

// SAFETY: the handle is used from one place at a time.
unsafe impl Send for EngineStmt {}

impl EngineStmt {
    pub(crate) fn new(stmt: *mut ffi::sqlite3_stmt, db: *mut ffi::sqlite3) -> Self {
        Self { stmt, db }
    }
}

impl Drop for EngineStmt {
    fn drop(&mut self) {
        if !self.stmt.is_null() {
            // SAFETY: the statement was prepared by us and finalized exactly once
            unsafe {
                ffi::sqlite3_finalize(self.stmt);
            }
            self.stmt = std::ptr::null_mut();
        }
    }
}

/// Rewind the statement, apply new bindings over the old ones, and report
/// any bind failure through the connection's error message.
unsafe fn rewind_and_bind(
    stmt: *mut EngineStmt,
    bind: impl FnOnce(*mut ffi::sqlite3_stmt) -> Result<(), c_int>,
    out_err: *mut *mut c_char,
) -> Result<(*mut ffi::sqlite3_stmt, *mut ffi::sqlite3), c_int> {
    // SAFETY: stmt came from prepare and is still live
    let (raw, db) = unsafe { ((*stmt).stmt, (*stmt).db) };
    // SAFETY: raw is a live statement; reset keeps existing bindings
    unsafe {
        ffi::sqlite3_reset(raw);
    }
    if bind(raw).is_err() {
        // SAFETY: db carries the bind error
        unsafe {
            let msg = db_error(db);
            set_err_msg(msg, out_err);
        }
        return Err(1);
    }
    Ok((raw, db))
}

unsafe fn query_impl(
    stmt: *mut EngineStmt,
    bind: impl FnOnce(*mut ffi::sqlite3_stmt) -> Result<(), c_int>,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let (raw, db) = match unsafe { rewind_and_bind(stmt, bind, out_err) } {
        Ok(pair) => pair,
        Err(status) => return status,
    };
    // Statement-backed rows borrow the handle; freeing them must not
    // finalize a statement the caller still owns.
    let rows = Box::new(EngineRows::new(raw, db, false));
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_rows = Box::into_raw(rows);
    }
    0
}

unsafe fn execute_impl(
    stmt: *mut EngineStmt,
    bind: impl FnOnce(*mut ffi::sqlite3_stmt) -> Result<(), c_int>,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let (raw, db) = match unsafe { rewind_and_bind(stmt, bind, out_err) } {
        Ok(pair) => pair,
        Err(status) => return status,
    };
    // SAFETY: raw and db are live for the whole loop
    unsafe {
        loop {
            match ffi::sqlite3_step(raw) {
                ffi::SQLITE_ROW => {}
                ffi::SQLITE_DONE => break,
                _ => {
                    let msg = db_error(db);
                    set_err_msg(msg, out_err);
                    return 1;
                }
            }
        }
        if !out_changes.is_null() {
            *out_changes = ffi::sqlite3_changes(db).max(0) as u64;
        }
    }
    0
}

unsafe fn run_impl(
    stmt: *mut EngineStmt,
    bind: impl FnOnce(*mut ffi::sqlite3_stmt) -> Result<(), c_int>,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let (raw, db) = match unsafe { rewind_and_bind(stmt, bind, out_err) } {
        Ok(pair) => pair,
        Err(status) => return status,
    };
    // A run takes a single step: enough to execute a write or to produce
    // the first row of a read.
    // SAFETY: raw and db are live
    unsafe {
        match ffi::sqlite3_step(raw) {
            ffi::SQLITE_ROW | ffi::SQLITE_DONE => 0,
            _ => {
                let msg = db_error(db);
                set_err_msg(msg, out_err);
                1
            }
        }
    }
}

/// Query the statement with whatever bindings it currently holds.
pub unsafe fn stmt_query(
    stmt: *mut EngineStmt,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { query_impl(stmt, |_| Ok(()), out_rows, out_err) }
}

pub unsafe fn stmt_query_positional(
    stmt: *mut EngineStmt,
    set: *const PositionalSet,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_positional and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { query_impl(stmt, |raw| apply_positional(raw, values), out_rows, out_err) }
}

pub unsafe fn stmt_query_named(
    stmt: *mut EngineStmt,
    set: *const NamedSet,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_named and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { query_impl(stmt, |raw| apply_named(raw, values), out_rows, out_err) }
}

/// Execute the statement to completion with its current bindings.
pub unsafe fn stmt_execute(
    stmt: *mut EngineStmt,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { execute_impl(stmt, |_| Ok(()), out_changes, out_err) }
}

pub unsafe fn stmt_execute_positional(
    stmt: *mut EngineStmt,
    set: *const PositionalSet,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_positional and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { execute_impl(stmt, |raw| apply_positional(raw, values), out_changes, out_err) }
}

pub unsafe fn stmt_execute_named(
    stmt: *mut EngineStmt,
    set: *const NamedSet,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_named and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { execute_impl(stmt, |raw| apply_named(raw, values), out_changes, out_err) }
}

/// Take a single step with the statement's current bindings.
pub unsafe fn stmt_run(stmt: *mut EngineStmt, out_err: *mut *mut c_char) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { run_impl(stmt, |_| Ok(()), out_err) }
}

pub unsafe fn stmt_run_positional(
    stmt: *mut EngineStmt,
    set: *const PositionalSet,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_positional and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { run_impl(stmt, |raw| apply_positional(raw, values), out_err) }
}

pub unsafe fn stmt_run_named(
    stmt: *mut EngineStmt,
    set: *const NamedSet,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_named and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { run_impl(stmt, |raw| apply_named(raw, values), out_err) }
}

/// Rewind the statement and clear every binding back to NULL.
pub unsafe fn stmt_reset(stmt: *mut EngineStmt) -> c_int {
    // SAFETY: stmt came from prepare and is still live
    unsafe {
        let raw = (*stmt).stmt;
        ffi::sqlite3_reset(raw);
        ffi::sqlite3_clear_bindings(raw);
    }
    0
}

/// Release a statement. Null is a no-op; the handle is finalized once.
pub unsafe fn finalize_stmt(stmt: *mut EngineStmt) {
    if !stmt.is_null() {
        // SAFETY: the pointer came from prepare
        let _ = unsafe { Box::from_raw(stmt) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;
    use crate::engine::{EngineConn, EngineDb, EngineRow};

    unsafe fn memory_conn() -> (*mut EngineDb, *mut EngineConn) {
        let mut db: *mut EngineDb = std::ptr::null_mut();
        let mut conn: *mut EngineConn = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals
        unsafe {
            assert_eq!(engine::open_file(c":memory:".as_ptr(), &mut db, &mut err), 0);
            assert_eq!(engine::connect(db, &mut conn, &mut err), 0);
        }
        (db, conn)
    }

    unsafe fn count(conn: *mut EngineConn, sql: &std::ffi::CStr) -> i64 {
        let mut err: *mut c_char = std::ptr::null_mut();
        let mut rows: *mut EngineRows = std::ptr::null_mut();
        // SAFETY: handles are local to this helper
        unsafe {
            assert_eq!(engine::query(conn, sql.as_ptr(), &mut rows, &mut err), 0);
            let mut row: *mut EngineRow = std::ptr::null_mut();
            assert_eq!(engine::next_row(rows, &mut row, &mut err), 0);
            let mut value = -1i64;
            assert_eq!(engine::row_get_int(row, 0, &mut value, &mut err), 0);
            engine::free_row(row);
            engine::free_rows(rows);
            value
        }
    }

    #[test]
    fn bindings_persist_across_runs() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut err: *mut c_char = std::ptr::null_mut();
            let mut changes = 0u64;
            engine::execute(conn, c"CREATE TABLE t (v TEXT)".as_ptr(), &mut changes, &mut err);

            let mut stmt: *mut EngineStmt = std::ptr::null_mut();
            assert_eq!(
                engine::prepare(conn, c"INSERT INTO t VALUES (?)".as_ptr(), &mut stmt, &mut err),
                0
            );

            let mut set: *mut PositionalSet = std::ptr::null_mut();
            engine::alloc_positional(&mut set);
            engine::positional_bind_text(set, 0, c"a".as_ptr(), &mut err);
            assert_eq!(stmt_run_positional(stmt, set, &mut err), 0);
            engine::free_positional(set);

            // Runs without parameters reuse the previous binding.
            assert_eq!(stmt_run(stmt, &mut err), 0);
            assert_eq!(stmt_run(stmt, &mut err), 0);

            assert_eq!(count(conn, c"SELECT COUNT(*) FROM t WHERE v = 'a'"), 3);

            finalize_stmt(stmt);
            engine::disconnect(conn);
            engine::close(db);
        }
    }

    #[test]
    fn reset_clears_bindings_to_null() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut err: *mut c_char = std::ptr::null_mut();
            let mut changes = 0u64;
            engine::execute(conn, c"CREATE TABLE t (v TEXT)".as_ptr(), &mut changes, &mut err);

            let mut stmt: *mut EngineStmt = std::ptr::null_mut();
            engine::prepare(conn, c"INSERT INTO t VALUES (?)".as_ptr(), &mut stmt, &mut err);

            let mut set: *mut PositionalSet = std::ptr::null_mut();
            engine::alloc_positional(&mut set);
            engine::positional_bind_text(set, 0, c"a".as_ptr(), &mut err);
            assert_eq!(stmt_run_positional(stmt, set, &mut err), 0);
            engine::free_positional(set);

            assert_eq!(stmt_reset(stmt), 0);
            assert_eq!(stmt_run(stmt, &mut err), 0);

            assert_eq!(count(conn, c"SELECT COUNT(*) FROM t WHERE v IS NULL"), 1);
            assert_eq!(count(conn, c"SELECT COUNT(*) FROM t"), 2);

            finalize_stmt(stmt);
            engine::disconnect(conn);
            engine::close(db);
        }
    }

    #[test]
    fn execute_reports_affected_rows() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut err: *mut c_char = std::ptr::null_mut();
            let mut changes = 0u64;
            engine::execute(conn, c"CREATE TABLE t (x INTEGER)".as_ptr(), &mut changes, &mut err);
            engine::execute(
                conn,
                c"INSERT INTO t VALUES (1), (2), (3)".as_ptr(),
                &mut changes,
                &mut err,
            );

            let mut stmt: *mut EngineStmt = std::ptr::null_mut();
            engine::prepare(conn, c"UPDATE t SET x = x + ?".as_ptr(), &mut stmt, &mut err);

            let mut set: *mut PositionalSet = std::ptr::null_mut();
            engine::alloc_positional(&mut set);
            engine::positional_bind_int(set, 0, 10);
            let mut affected = 0u64;
            assert_eq!(stmt_execute_positional(stmt, set, &mut affected, &mut err), 0);
            engine::free_positional(set);
            assert_eq!(affected, 3);

            finalize_stmt(stmt);
            engine::disconnect(conn);
            engine::close(db);
        }
    }
}
