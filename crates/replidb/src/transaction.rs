//! Transactions.
//!
//! Commit and rollback take the transaction by value: whatever the outcome,
//! the handle is spent and the compiler stops any further use. A transaction
//! dropped without being resolved rolls back.

use crate::connection::Connection;
use crate::engine;
use crate::handle::NativeHandle;
use crate::native::check;
use replidb_core::{CursorError, Cx, Error, Outcome, Result};
use std::ffi::{c_char, c_int};
use std::marker::PhantomData;

/// Locking behavior for a new transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Take no locks until the first read or write.
    Deferred,
    /// Take the write lock immediately.
    Immediate,
    /// Exclude other connections entirely.
    Exclusive,
    /// Reads only; writes inside the transaction fail.
    ReadOnly,
}

impl TransactionKind {
    pub(crate) fn code(self) -> c_int {
        match self {
            TransactionKind::Deferred => engine::TRANSACTION_DEFERRED,
            TransactionKind::Immediate => engine::TRANSACTION_IMMEDIATE,
            TransactionKind::Exclusive => engine::TRANSACTION_EXCLUSIVE,
            TransactionKind::ReadOnly => engine::TRANSACTION_READONLY,
        }
    }
}

/// An open transaction.
///
/// Borrows the connection it was started on, so the connection cannot be
/// disconnected or dropped while the transaction is unresolved.
pub struct Transaction<'conn> {
    handle: NativeHandle<engine::EngineTxn>,
    _conn: PhantomData<&'conn ()>,
}

impl Transaction<'_> {
    pub(crate) fn new(ptr: *mut engine::EngineTxn) -> Self {
        Self {
            handle: NativeHandle::owned(ptr, engine::free_transaction),
            _conn: PhantomData,
        }
    }

    /// A non-owning view of the connection this transaction runs on.
    /// Statements executed through it join the transaction.
    pub fn connection(&self) -> Result<Connection> {
        if self.handle.is_released() {
            return Err(Error::Cursor(CursorError::new(
                "transaction has been resolved",
            )));
        }
        let mut conn: *const engine::EngineConn = std::ptr::null();
        // SAFETY: the transaction handle is live
        unsafe {
            engine::transaction_connection(self.handle.as_ptr(), &mut conn);
        }
        Ok(Connection::borrowed(conn.cast_mut()))
    }

    fn commit_sync(mut self) -> Result<()> {
        // The engine consumes the handle even when the commit fails.
        let ptr = self.handle.take();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: ownership of ptr moves into the engine here
        let status = unsafe { engine::commit_transaction(ptr, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err) }
    }

    fn rollback_sync(mut self) -> Result<()> {
        let ptr = self.handle.take();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: ownership of ptr moves into the engine here
        let status = unsafe { engine::rollback_transaction(ptr, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err) }
    }

    /// Commit, consuming the transaction.
    pub fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.commit_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Roll back, consuming the transaction.
    pub fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        let result = self.rollback_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }
}
