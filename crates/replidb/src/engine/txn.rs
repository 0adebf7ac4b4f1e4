//! Transaction entry points.
//!
//! Commit and rollback both consume the handle, success or not: once either
//! is attempted the transaction is finished and the pointer must not be
//! used again. A handle freed without being resolved rolls back.

use super::conn::EngineConn;
use super::{exec, set_err_msg};
use std::ffi::{c_char, c_int};

pub const TRANSACTION_DEFERRED: c_int = 1;
pub const TRANSACTION_IMMEDIATE: c_int = 2;
pub const TRANSACTION_EXCLUSIVE: c_int = 3;
pub const TRANSACTION_READONLY: c_int = 4;

/// An open transaction. Holds a non-owning view of the connection it was
/// started on; the connection must outlive the transaction.
pub struct EngineTxn {
    conn: *const EngineConn,
    resolved: bool,
}

// SAFETY: the handle is used from one place at a time.
unsafe impl Send for EngineTxn {}

impl EngineTxn {
    pub(crate) fn new(conn: *const EngineConn) -> Self {
        Self {
            conn,
            resolved: false,
        }
    }
}

impl Drop for EngineTxn {
    fn drop(&mut self) {
        if !self.resolved {
            // SAFETY: the connection outlives the transaction
            let db = unsafe { (*self.conn).db };
            // SAFETY: db is live; failure here means there was nothing to
            // roll back
            let _ = unsafe { exec(db, c"ROLLBACK") };
        }
    }
}

/// Commit and consume the transaction.
pub unsafe fn commit_transaction(txn: *mut EngineTxn, out_err: *mut *mut c_char) -> c_int {
    // SAFETY: the pointer came from begin_transaction and is consumed here
    let mut txn = unsafe { Box::from_raw(txn) };
    txn.resolved = true;
    // SAFETY: the connection outlives the transaction
    let db = unsafe { (*txn.conn).db };
    // SAFETY: db is live
    if let Err(e) = unsafe { exec(db, c"COMMIT") } {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(e, out_err) };
        return 1;
    }
    0
}

/// Roll back and consume the transaction.
pub unsafe fn rollback_transaction(txn: *mut EngineTxn, out_err: *mut *mut c_char) -> c_int {
    // SAFETY: the pointer came from begin_transaction and is consumed here
    let mut txn = unsafe { Box::from_raw(txn) };
    txn.resolved = true;
    // SAFETY: the connection outlives the transaction
    let db = unsafe { (*txn.conn).db };
    // SAFETY: db is live
    if let Err(e) = unsafe { exec(db, c"ROLLBACK") } {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(e, out_err) };
        return 1;
    }
    0
}

/// Borrow the connection the transaction runs on. The returned pointer is
/// non-owning and must not be released.
pub unsafe fn transaction_connection(
    txn: *const EngineTxn,
    out_conn: *mut *const EngineConn,
) -> c_int {
    // SAFETY: txn came from begin_transaction and is still live
    unsafe {
        *out_conn = (*txn).conn;
    }
    0
}

/// Release an unresolved transaction, rolling it back. Null is a no-op.
pub unsafe fn free_transaction(txn: *mut EngineTxn) {
    if !txn.is_null() {
        // SAFETY: the pointer came from begin_transaction
        let _ = unsafe { Box::from_raw(txn) };
    }
}
