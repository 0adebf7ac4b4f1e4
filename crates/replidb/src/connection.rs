//! Connections: ad-hoc queries, prepared statements, transactions, and
//! connection metadata.

use crate::engine;
use crate::handle::NativeHandle;
use crate::native::{NamedValues, PositionalValues, check, to_cstring};
use crate::rows::Rows;
use crate::statement::Statement;
use crate::transaction::{Transaction, TransactionKind};
use replidb_core::{CursorError, Cx, Error, Outcome, Params, Result};
use std::ffi::{CStr, c_char};

/// An open connection.
///
/// Connections from [`crate::Database::connect`] own their handle and
/// release it on [`Connection::disconnect`] or drop. The view obtained from
/// [`Transaction::connection`] borrows the transaction's handle instead and
/// never releases it.
pub struct Connection {
    handle: NativeHandle<engine::EngineConn>,
}

impl Connection {
    pub(crate) fn owned(ptr: *mut engine::EngineConn) -> Self {
        Self {
            handle: NativeHandle::owned(ptr, engine::disconnect),
        }
    }

    pub(crate) fn borrowed(ptr: *mut engine::EngineConn) -> Self {
        Self {
            handle: NativeHandle::borrowed(ptr),
        }
    }

    fn live(&self) -> Result<*mut engine::EngineConn> {
        if self.handle.is_released() {
            return Err(Error::Cursor(CursorError::new("connection has been closed")));
        }
        Ok(self.handle.as_ptr())
    }

    pub(crate) fn query_sync(&self, sql: &str, params: &Params) -> Result<Rows<'_>> {
        let conn = self.live()?;
        let csql = to_cstring(sql, "SQL text")?;
        let mut rows: *mut engine::EngineRows = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = match params {
            // SAFETY: conn is live, csql is NUL-terminated
            Params::None => unsafe {
                engine::query(conn, csql.as_ptr(), &mut rows, &mut err)
            },
            Params::Positional(values) => {
                let set = PositionalValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe {
                    engine::query_positional(conn, csql.as_ptr(), set.as_ptr(), &mut rows, &mut err)
                }
            }
            Params::Named(values) => {
                let set = NamedValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe {
                    engine::query_named(conn, csql.as_ptr(), set.as_ptr(), &mut rows, &mut err)
                }
            }
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(Rows::new(rows))
    }

    pub(crate) fn execute_sync(&self, sql: &str, params: &Params) -> Result<u64> {
        let conn = self.live()?;
        let csql = to_cstring(sql, "SQL text")?;
        let mut changes = 0u64;
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = match params {
            // SAFETY: conn is live, csql is NUL-terminated
            Params::None => unsafe {
                engine::execute(conn, csql.as_ptr(), &mut changes, &mut err)
            },
            Params::Positional(values) => {
                let set = PositionalValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe {
                    engine::execute_positional(
                        conn,
                        csql.as_ptr(),
                        set.as_ptr(),
                        &mut changes,
                        &mut err,
                    )
                }
            }
            Params::Named(values) => {
                let set = NamedValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe {
                    engine::execute_named(conn, csql.as_ptr(), set.as_ptr(), &mut changes, &mut err)
                }
            }
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(changes)
    }

    pub(crate) fn prepare_sync(&self, sql: &str) -> Result<Statement> {
        let conn = self.live()?;
        let csql = to_cstring(sql, "SQL text")?;
        let mut stmt: *mut engine::EngineStmt = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: conn is live, csql is NUL-terminated
        let status = unsafe { engine::prepare(conn, csql.as_ptr(), &mut stmt, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(Statement::new(stmt))
    }

    pub(crate) fn transaction_sync(&self, kind: TransactionKind) -> Result<Transaction<'_>> {
        let conn = self.live()?;
        let mut txn: *mut engine::EngineTxn = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: conn is live, out-parameters point at locals
        let status = unsafe { engine::begin_transaction(conn, kind.code(), &mut txn, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(Transaction::new(txn))
    }

    pub(crate) fn load_extension_sync(&self, path: &str, entry_point: Option<&str>) -> Result<()> {
        let conn = self.live()?;
        let cpath = to_cstring(path, "extension path")?;
        let centry = match entry_point {
            Some(entry) => Some(to_cstring(entry, "extension entry point")?),
            None => None,
        };
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: conn is live, strings are NUL-terminated
        let status = unsafe {
            engine::load_extension(
                conn,
                cpath.as_ptr(),
                centry.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
                &mut err,
            )
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err) }
    }

    pub(crate) fn reset_sync(&self) -> Result<()> {
        let conn = self.live()?;
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: conn is live
        let status = unsafe { engine::reset_connection(conn, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err) }
    }

    /// Run a query and get a lazy forward-only cursor over its results.
    /// The cursor borrows this connection.
    pub fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: impl Into<Params>,
    ) -> impl Future<Output = Outcome<Rows<'_>, Error>> + Send {
        let result = self.query_sync(sql, &params.into());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Execute a statement to completion, reporting rows changed.
    pub fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: impl Into<Params>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.execute_sync(sql, &params.into());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Prepare a statement for repeated use.
    pub fn prepare(
        &self,
        _cx: &Cx,
        sql: &str,
    ) -> impl Future<Output = Outcome<Statement, Error>> + Send {
        let result = self.prepare_sync(sql);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Begin a transaction with the requested locking behavior. The
    /// transaction borrows this connection until it resolves.
    pub fn transaction(
        &self,
        _cx: &Cx,
        kind: TransactionKind,
    ) -> impl Future<Output = Outcome<Transaction<'_>, Error>> + Send {
        let result = self.transaction_sync(kind);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Load a runtime extension.
    pub fn load_extension(
        &self,
        _cx: &Cx,
        path: &str,
        entry_point: Option<&str>,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.load_extension_sync(path, entry_point);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Roll back any transaction left open on this connection.
    pub fn reset(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.reset_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> Result<u64> {
        let conn = self.live()?;
        // SAFETY: conn is live
        Ok(unsafe { engine::changes(conn) })
    }

    /// Rowid of the most recent successful INSERT.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        let conn = self.live()?;
        // SAFETY: conn is live
        Ok(unsafe { engine::last_insert_rowid(conn) })
    }

    /// Release the connection. Safe to call more than once; borrowed views
    /// never release the underlying handle.
    pub fn disconnect(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use replidb_core::Value;

    fn memory_conn() -> (Database, Connection) {
        let db = Database::open_local_sync(":memory:").unwrap();
        let conn = db.connect_sync().unwrap();
        (db, conn)
    }

    #[test]
    fn disconnect_is_idempotent() {
        let (_db, mut conn) = memory_conn();
        conn.disconnect();
        conn.disconnect();
        let err = conn.execute_sync("SELECT 1", &Params::None).unwrap_err();
        assert!(matches!(err, Error::Cursor(_)));
    }

    #[test]
    fn released_connection_reports_metadata_errors() {
        let (_db, mut conn) = memory_conn();
        conn.execute_sync("CREATE TABLE t (x INTEGER)", &Params::None)
            .unwrap();
        conn.execute_sync("INSERT INTO t VALUES (7)", &Params::None)
            .unwrap();
        assert_eq!(conn.changes().unwrap(), 1);
        assert_eq!(conn.last_insert_rowid().unwrap(), 1);
        conn.disconnect();
        assert!(matches!(conn.changes(), Err(Error::Cursor(_))));
        assert!(matches!(conn.last_insert_rowid(), Err(Error::Cursor(_))));
    }

    #[test]
    fn parameter_sets_are_rebuilt_per_call() {
        let (_db, conn) = memory_conn();
        conn.execute_sync("CREATE TABLE t (x INTEGER)", &Params::None)
            .unwrap();
        let params = Params::Positional(vec![Value::Integer(1)]);
        // The same Params value works across calls because each call builds
        // a fresh native set.
        conn.execute_sync("INSERT INTO t VALUES (?)", &params).unwrap();
        conn.execute_sync("INSERT INTO t VALUES (?)", &params).unwrap();
        let mut rows = conn
            .query_sync("SELECT COUNT(*) FROM t", &Params::None)
            .unwrap();
        let row = rows.next_sync().unwrap().unwrap();
        assert_eq!(row.get_int(0).unwrap(), 2);
    }
}
