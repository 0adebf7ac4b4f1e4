//! Prepared statements.
//!
//! A statement rewinds before every invocation but keeps its bindings, so
//! values bound by one call are still in place for the next call that
//! passes no parameters. [`Statement::reset`] clears the bindings back to
//! NULL. After [`Statement::finalize`] every operation fails.

use crate::engine;
use crate::handle::NativeHandle;
use crate::native::{NamedValues, PositionalValues, check};
use crate::rows::Rows;
use replidb_core::{Cx, Error, Outcome, Params, Result, StatementError};
use std::ffi::c_char;

pub struct Statement {
    handle: NativeHandle<engine::EngineStmt>,
}

impl Statement {
    pub(crate) fn new(ptr: *mut engine::EngineStmt) -> Self {
        Self {
            handle: NativeHandle::owned(ptr, engine::finalize_stmt),
        }
    }

    fn live(&self) -> Result<*mut engine::EngineStmt> {
        if self.handle.is_released() {
            return Err(Error::Statement(StatementError::finalized()));
        }
        Ok(self.handle.as_ptr())
    }

    pub(crate) fn query_sync(&self, params: &Params) -> Result<Rows<'_>> {
        let stmt = self.live()?;
        let mut rows: *mut engine::EngineRows = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = match params {
            // SAFETY: stmt is live, out-parameters point at locals
            Params::None => unsafe { engine::stmt_query(stmt, &mut rows, &mut err) },
            Params::Positional(values) => {
                let set = PositionalValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe { engine::stmt_query_positional(stmt, set.as_ptr(), &mut rows, &mut err) }
            }
            Params::Named(values) => {
                let set = NamedValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe { engine::stmt_query_named(stmt, set.as_ptr(), &mut rows, &mut err) }
            }
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(Rows::new(rows))
    }

    pub(crate) fn execute_sync(&self, params: &Params) -> Result<u64> {
        let stmt = self.live()?;
        let mut changes = 0u64;
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = match params {
            // SAFETY: stmt is live, out-parameters point at locals
            Params::None => unsafe { engine::stmt_execute(stmt, &mut changes, &mut err) },
            Params::Positional(values) => {
                let set = PositionalValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe {
                    engine::stmt_execute_positional(stmt, set.as_ptr(), &mut changes, &mut err)
                }
            }
            Params::Named(values) => {
                let set = NamedValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe { engine::stmt_execute_named(stmt, set.as_ptr(), &mut changes, &mut err) }
            }
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(changes)
    }

    pub(crate) fn run_sync(&self, params: &Params) -> Result<()> {
        let stmt = self.live()?;
        let mut err: *mut c_char = std::ptr::null_mut();
        let status = match params {
            // SAFETY: stmt is live
            Params::None => unsafe { engine::stmt_run(stmt, &mut err) },
            Params::Positional(values) => {
                let set = PositionalValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe { engine::stmt_run_positional(stmt, set.as_ptr(), &mut err) }
            }
            Params::Named(values) => {
                let set = NamedValues::build(values)?;
                // SAFETY: the set lives until the call returns
                unsafe { engine::stmt_run_named(stmt, set.as_ptr(), &mut err) }
            }
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err) }
    }

    pub(crate) fn reset_sync(&self) -> Result<()> {
        let stmt = self.live()?;
        // SAFETY: stmt is live
        unsafe { engine::stmt_reset(stmt) };
        Ok(())
    }

    /// Query with the supplied parameters bound over any previous ones.
    ///
    /// The cursor borrows this statement, so the statement cannot be
    /// finalized or dropped while the cursor is alive.
    pub fn query(
        &self,
        _cx: &Cx,
        params: impl Into<Params>,
    ) -> impl Future<Output = Outcome<Rows<'_>, Error>> + Send {
        let result = self.query_sync(&params.into());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Execute to completion, reporting rows changed.
    pub fn execute(
        &self,
        _cx: &Cx,
        params: impl Into<Params>,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.execute_sync(&params.into());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Take a single step, discarding any produced row. Useful for writes
    /// where the affected count does not matter.
    pub fn run(
        &self,
        _cx: &Cx,
        params: impl Into<Params>,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.run_sync(&params.into());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Rewind and clear every binding back to NULL.
    pub fn reset(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.reset_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Release the statement. Safe to call more than once.
    pub fn finalize(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, Database};
    use replidb_core::Value;

    fn memory_conn() -> (Database, Connection) {
        let db = Database::open_local_sync(":memory:").unwrap();
        let conn = db.connect_sync().unwrap();
        (db, conn)
    }

    #[test]
    fn finalize_poisons_the_statement() {
        let (_db, conn) = memory_conn();
        let mut stmt = conn.prepare_sync("SELECT 1").unwrap();
        stmt.finalize();
        stmt.finalize();
        let err = stmt.run_sync(&Params::None).unwrap_err();
        assert!(matches!(
            err,
            Error::Statement(StatementError {
                kind: replidb_core::StatementErrorKind::Finalized,
                ..
            })
        ));
    }

    #[test]
    fn cursors_release_their_borrow_when_dropped() {
        let (_db, conn) = memory_conn();
        let mut stmt = conn.prepare_sync("SELECT 1").unwrap();
        let mut rows = stmt.query_sync(&Params::None).unwrap();
        assert!(rows.next_sync().unwrap().is_some());
        drop(rows);
        // The cursor borrowed the statement; finalizing only borrow-checks
        // once every cursor is gone.
        stmt.finalize();
        assert!(stmt.query_sync(&Params::None).is_err());
    }

    #[test]
    fn statement_outlives_its_cursors() {
        let (_db, conn) = memory_conn();
        conn.execute_sync("CREATE TABLE t (x INTEGER)", &Params::None)
            .unwrap();
        conn.execute_sync("INSERT INTO t VALUES (1), (2)", &Params::None)
            .unwrap();
        let stmt = conn.prepare_sync("SELECT x FROM t ORDER BY x").unwrap();

        for _ in 0..2 {
            let mut rows = stmt.query_sync(&Params::None).unwrap();
            let row = rows.next_sync().unwrap().unwrap();
            assert_eq!(row.get_int(0).unwrap(), 1);
            // Dropping the cursor must leave the statement usable.
        }

        let mut rows = stmt.query_sync(&Params::None).unwrap();
        let mut total = 0;
        while rows.next_sync().unwrap().is_some() {
            total += 1;
        }
        assert_eq!(total, 2);
    }

    #[test]
    fn run_binds_persist_until_reset() {
        let (_db, conn) = memory_conn();
        conn.execute_sync("CREATE TABLE t (v TEXT)", &Params::None)
            .unwrap();
        let stmt = conn.prepare_sync("INSERT INTO t VALUES (?)").unwrap();

        stmt.run_sync(&Params::Positional(vec![Value::from("a")])).unwrap();
        stmt.run_sync(&Params::None).unwrap();
        stmt.reset_sync().unwrap();
        stmt.run_sync(&Params::None).unwrap();

        let mut rows = conn
            .query_sync("SELECT COUNT(*) FROM t WHERE v = 'a'", &Params::None)
            .unwrap();
        assert_eq!(rows.next_sync().unwrap().unwrap().get_int(0).unwrap(), 2);

        let mut rows = conn
            .query_sync("SELECT COUNT(*) FROM t WHERE v IS NULL", &Params::None)
            .unwrap();
        assert_eq!(rows.next_sync().unwrap().unwrap().get_int(0).unwrap(), 1);
    }
}
