//! Connection entry points: ad-hoc queries and executes, statement
//! preparation, transactions, and connection metadata.

use super::params::{NamedSet, PositionalSet, apply_named, apply_positional};
use super::rows::EngineRows;
use super::stmt::EngineStmt;
use super::txn::{
    EngineTxn, TRANSACTION_DEFERRED, TRANSACTION_EXCLUSIVE, TRANSACTION_IMMEDIATE,
    TRANSACTION_READONLY,
};
use super::{db_error, exec, prepare_raw, set_err_msg};
use crate::ffi;
use std::ffi::{CStr, c_char, c_int};

/// An open connection. Owns the underlying library handle and closes it
/// exactly once on drop.
pub struct EngineConn {
    pub(crate) db: *mut ffi::sqlite3,
}

// SAFETY: the handle is used from one place at a time.
unsafe impl Send for EngineConn {}

impl EngineConn {
    pub(crate) fn new(db: *mut ffi::sqlite3) -> Self {
        Self { db }
    }
}

impl Drop for EngineConn {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: the handle was opened by us and is closed exactly once
            unsafe {
                ffi::sqlite3_close_v2(self.db);
            }
            self.db = std::ptr::null_mut();
        }
    }
}

unsafe fn read_sql<'a>(
    sql: *const c_char,
    out_err: *mut *mut c_char,
) -> Result<&'a CStr, c_int> {
    if sql.is_null() {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("SQL text pointer is null".to_string(), out_err) };
        return Err(1);
    }
    // SAFETY: caller passes a NUL-terminated string
    Ok(unsafe { CStr::from_ptr(sql) })
}

/// Release a connection. Null is a no-op.
pub unsafe fn disconnect(conn: *mut EngineConn) {
    if !conn.is_null() {
        // SAFETY: the pointer came from connect
        let _ = unsafe { Box::from_raw(conn) };
    }
}

/// Roll back any transaction left open on the connection. Succeeds when
/// there is nothing to roll back.
pub unsafe fn reset_connection(conn: *mut EngineConn, _out_err: *mut *mut c_char) -> c_int {
    // SAFETY: conn came from connect and is still live
    let db = unsafe { (*conn).db };
    // SAFETY: db is live; a "no transaction" error is the idle case
    let _ = unsafe { exec(db, c"ROLLBACK") };
    0
}

/// Load a runtime extension. Extension loading is switched on only for the
/// duration of the call.
pub unsafe fn load_extension(
    conn: *mut EngineConn,
    path: *const c_char,
    entry_point: *const c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    if path.is_null() {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("extension path is null".to_string(), out_err) };
        return 1;
    }
    // SAFETY: conn came from connect and is still live
    let db = unsafe { (*conn).db };
    let mut errmsg: *mut c_char = std::ptr::null_mut();
    // SAFETY: db is live, path and entry_point are caller strings
    let rc = unsafe {
        ffi::sqlite3_enable_load_extension(db, 1);
        let rc = ffi::sqlite3_load_extension(db, path, entry_point, &mut errmsg);
        ffi::sqlite3_enable_load_extension(db, 0);
        rc
    };
    if rc != ffi::SQLITE_OK {
        let msg = if errmsg.is_null() {
            ffi::error_string(rc).to_string()
        } else {
            // SAFETY: the library allocated errmsg; it is freed with sqlite3_free
            unsafe {
                let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                ffi::sqlite3_free(errmsg.cast());
                msg
            }
        };
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(msg, out_err) };
        return 1;
    }
    0
}

/// Begin a transaction with the requested locking behavior. The returned
/// handle is resolved by commit or rollback and freed exactly once.
pub unsafe fn begin_transaction(
    conn: *const EngineConn,
    behavior: c_int,
    out_txn: *mut *mut EngineTxn,
    out_err: *mut *mut c_char,
) -> c_int {
    let sql = match behavior {
        TRANSACTION_IMMEDIATE => c"BEGIN IMMEDIATE",
        TRANSACTION_EXCLUSIVE => c"BEGIN EXCLUSIVE",
        // Read-only transactions take no locks up front either.
        TRANSACTION_DEFERRED | TRANSACTION_READONLY => c"BEGIN DEFERRED",
        _ => c"BEGIN DEFERRED",
    };
    // SAFETY: conn came from connect and is still live
    let db = unsafe { (*conn).db };
    // SAFETY: db is live
    if let Err(e) = unsafe { exec(db, sql) } {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(e, out_err) };
        return 1;
    }
    let txn = Box::new(EngineTxn::new(conn));
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_txn = Box::into_raw(txn);
    }
    0
}

/// Prepare a statement for repeated use.
pub unsafe fn prepare(
    conn: *mut EngineConn,
    sql: *const c_char,
    out_stmt: *mut *mut EngineStmt,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let sql = match unsafe { read_sql(sql, out_err) } {
        Ok(sql) => sql,
        Err(status) => return status,
    };
    // SAFETY: conn came from connect and is still live
    let db = unsafe { (*conn).db };
    // SAFETY: db is live, sql is NUL-terminated
    let raw = match unsafe { prepare_raw(db, sql) } {
        Ok(raw) => raw,
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            return 1;
        }
    };
    let stmt = Box::new(EngineStmt::new(raw, db));
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_stmt = Box::into_raw(stmt);
    }
    0
}

unsafe fn query_impl(
    conn: *mut EngineConn,
    sql: *const c_char,
    bind: impl FnOnce(*mut ffi::sqlite3_stmt) -> Result<(), c_int>,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let sql = match unsafe { read_sql(sql, out_err) } {
        Ok(sql) => sql,
        Err(status) => return status,
    };
    // SAFETY: conn came from connect and is still live
    let db = unsafe { (*conn).db };
    // SAFETY: db is live, sql is NUL-terminated
    let raw = match unsafe { prepare_raw(db, sql) } {
        Ok(raw) => raw,
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            return 1;
        }
    };
    if bind(raw).is_err() {
        // SAFETY: db carries the bind error, raw is abandoned here
        unsafe {
            let msg = db_error(db);
            ffi::sqlite3_finalize(raw);
            set_err_msg(msg, out_err);
        }
        return 1;
    }
    // Rows from an ad-hoc query own the statement and finalize it on free.
    let rows = Box::new(EngineRows::new(raw, db, true));
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_rows = Box::into_raw(rows);
    }
    0
}

/// Run a query and hand back a lazy forward-only cursor.
pub unsafe fn query(
    conn: *mut EngineConn,
    sql: *const c_char,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { query_impl(conn, sql, |_| Ok(()), out_rows, out_err) }
}

pub unsafe fn query_positional(
    conn: *mut EngineConn,
    sql: *const c_char,
    set: *const PositionalSet,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_positional and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe {
        query_impl(
            conn,
            sql,
            |stmt| apply_positional(stmt, values),
            out_rows,
            out_err,
        )
    }
}

pub unsafe fn query_named(
    conn: *mut EngineConn,
    sql: *const c_char,
    set: *const NamedSet,
    out_rows: *mut *mut EngineRows,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_named and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe {
        query_impl(
            conn,
            sql,
            |stmt| apply_named(stmt, values),
            out_rows,
            out_err,
        )
    }
}

unsafe fn execute_impl(
    conn: *mut EngineConn,
    sql: *const c_char,
    bind: impl FnOnce(*mut ffi::sqlite3_stmt) -> Result<(), c_int>,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let sql = match unsafe { read_sql(sql, out_err) } {
        Ok(sql) => sql,
        Err(status) => return status,
    };
    // SAFETY: conn came from connect and is still live
    let db = unsafe { (*conn).db };
    // SAFETY: db is live, sql is NUL-terminated
    let raw = match unsafe { prepare_raw(db, sql) } {
        Ok(raw) => raw,
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            return 1;
        }
    };
    if bind(raw).is_err() {
        // SAFETY: db carries the bind error, raw is abandoned here
        unsafe {
            let msg = db_error(db);
            ffi::sqlite3_finalize(raw);
            set_err_msg(msg, out_err);
        }
        return 1;
    }
    // SAFETY: raw is a live statement, finalized on every path below
    unsafe {
        loop {
            match ffi::sqlite3_step(raw) {
                ffi::SQLITE_ROW => {}
                ffi::SQLITE_DONE => break,
                _ => {
                    let msg = db_error(db);
                    ffi::sqlite3_finalize(raw);
                    set_err_msg(msg, out_err);
                    return 1;
                }
            }
        }
        ffi::sqlite3_finalize(raw);
        if !out_changes.is_null() {
            *out_changes = ffi::sqlite3_changes(db).max(0) as u64;
        }
    }
    0
}

/// Execute a statement to completion, reporting the number of rows changed.
pub unsafe fn execute(
    conn: *mut EngineConn,
    sql: *const c_char,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    unsafe { execute_impl(conn, sql, |_| Ok(()), out_changes, out_err) }
}

pub unsafe fn execute_positional(
    conn: *mut EngineConn,
    sql: *const c_char,
    set: *const PositionalSet,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_positional and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe {
        execute_impl(
            conn,
            sql,
            |stmt| apply_positional(stmt, values),
            out_changes,
            out_err,
        )
    }
}

pub unsafe fn execute_named(
    conn: *mut EngineConn,
    sql: *const c_char,
    set: *const NamedSet,
    out_changes: *mut u64,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: set came from alloc_named and is live for this call
    let values = unsafe { (*set).values() };
    // SAFETY: forwarded caller pointers, checked inside
    unsafe {
        execute_impl(
            conn,
            sql,
            |stmt| apply_named(stmt, values),
            out_changes,
            out_err,
        )
    }
}

/// Rows changed by the most recent INSERT, UPDATE or DELETE.
pub unsafe fn changes(conn: *const EngineConn) -> u64 {
    // SAFETY: conn came from connect and is still live
    unsafe { ffi::sqlite3_changes((*conn).db).max(0) as u64 }
}

/// Rowid of the most recent successful INSERT.
pub unsafe fn last_insert_rowid(conn: *const EngineConn) -> i64 {
    // SAFETY: conn came from connect and is still live
    unsafe { ffi::sqlite3_last_insert_rowid((*conn).db) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;

    unsafe fn memory_conn() -> (*mut engine::EngineDb, *mut EngineConn) {
        let mut db: *mut engine::EngineDb = std::ptr::null_mut();
        let mut conn: *mut EngineConn = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals
        unsafe {
            assert_eq!(engine::open_file(c":memory:".as_ptr(), &mut db, &mut err), 0);
            assert_eq!(engine::connect(db, &mut conn, &mut err), 0);
        }
        (db, conn)
    }

    #[test]
    fn execute_reports_changes_and_rowid() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut changes_out = 0u64;
            let mut err: *mut c_char = std::ptr::null_mut();
            assert_eq!(
                execute(
                    conn,
                    c"CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)".as_ptr(),
                    &mut changes_out,
                    &mut err,
                ),
                0
            );
            assert_eq!(
                execute(
                    conn,
                    c"INSERT INTO t (v) VALUES ('a'), ('b')".as_ptr(),
                    &mut changes_out,
                    &mut err,
                ),
                0
            );
            assert_eq!(changes_out, 2);
            assert_eq!(changes(conn), 2);
            assert_eq!(last_insert_rowid(conn), 2);
            disconnect(conn);
            engine::close(db);
        }
    }

    #[test]
    fn query_with_positional_parameters() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut err: *mut c_char = std::ptr::null_mut();
            let mut changes_out = 0u64;
            execute(conn, c"CREATE TABLE t (x INTEGER)".as_ptr(), &mut changes_out, &mut err);
            execute(
                conn,
                c"INSERT INTO t VALUES (1), (2), (3)".as_ptr(),
                &mut changes_out,
                &mut err,
            );

            let mut set: *mut PositionalSet = std::ptr::null_mut();
            engine::alloc_positional(&mut set);
            engine::positional_bind_int(set, 0, 2);

            let mut rows: *mut EngineRows = std::ptr::null_mut();
            assert_eq!(
                query_positional(
                    conn,
                    c"SELECT x FROM t WHERE x > ? ORDER BY x".as_ptr(),
                    set,
                    &mut rows,
                    &mut err,
                ),
                0
            );
            engine::free_positional(set);

            let mut row: *mut engine::EngineRow = std::ptr::null_mut();
            assert_eq!(engine::next_row(rows, &mut row, &mut err), 0);
            assert!(!row.is_null());
            let mut value = 0i64;
            assert_eq!(engine::row_get_int(row, 0, &mut value, &mut err), 0);
            assert_eq!(value, 3);
            engine::free_row(row);

            let mut row2: *mut engine::EngineRow = std::ptr::null_mut();
            assert_eq!(engine::next_row(rows, &mut row2, &mut err), 0);
            assert!(row2.is_null());

            engine::free_rows(rows);
            disconnect(conn);
            engine::close(db);
        }
    }

    #[test]
    fn named_parameters_match_any_prefix() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut err: *mut c_char = std::ptr::null_mut();
            let mut changes_out = 0u64;
            execute(conn, c"CREATE TABLE t (x INTEGER, y INTEGER)".as_ptr(), &mut changes_out, &mut err);

            let mut set: *mut NamedSet = std::ptr::null_mut();
            engine::alloc_named(&mut set);
            // Bare names resolve against :x and @y in the SQL.
            engine::named_bind_int(set, c"x".as_ptr(), 10);
            engine::named_bind_int(set, c"y".as_ptr(), 20);
            assert_eq!(
                execute_named(
                    conn,
                    c"INSERT INTO t VALUES (:x, @y)".as_ptr(),
                    set,
                    &mut changes_out,
                    &mut err,
                ),
                0
            );
            engine::free_named(set);
            assert_eq!(changes_out, 1);
            disconnect(conn);
            engine::close(db);
        }
    }

    #[test]
    fn reset_connection_rolls_back_open_transaction() {
        // SAFETY: handles released at the end of the test
        unsafe {
            let (db, conn) = memory_conn();
            let mut err: *mut c_char = std::ptr::null_mut();
            let mut changes_out = 0u64;
            execute(conn, c"CREATE TABLE t (x INTEGER)".as_ptr(), &mut changes_out, &mut err);
            execute(conn, c"BEGIN".as_ptr(), &mut changes_out, &mut err);
            execute(conn, c"INSERT INTO t VALUES (1)".as_ptr(), &mut changes_out, &mut err);
            assert_eq!(reset_connection(conn, &mut err), 0);
            // The insert was rolled back.
            let mut rows: *mut EngineRows = std::ptr::null_mut();
            assert_eq!(query(conn, c"SELECT COUNT(*) FROM t".as_ptr(), &mut rows, &mut err), 0);
            let mut row: *mut engine::EngineRow = std::ptr::null_mut();
            engine::next_row(rows, &mut row, &mut err);
            let mut count = -1i64;
            engine::row_get_int(row, 0, &mut count, &mut err);
            assert_eq!(count, 0);
            engine::free_row(row);
            engine::free_rows(rows);
            // Idle connections reset without error.
            assert_eq!(reset_connection(conn, &mut err), 0);
            disconnect(conn);
            engine::close(db);
        }
    }
}
