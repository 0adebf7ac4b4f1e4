//! Embedded SQL driver with a libsql-style surface.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! replidb wraps an embedded SQLite engine behind a strict native boundary
//! (status codes, out-parameters, exactly-once handle release) and exposes
//! an async driver surface on top of it: databases, connections, prepared
//! statements, lazy row cursors, and consuming transactions.
//!
//! # Open modes
//!
//! - **Local**: a file path or `:memory:` (shared between the handle's
//!   connections).
//! - **Remote**: a URL carried through the API; the embedded engine rejects
//!   it when a connection is requested.
//! - **Embedded replica**: a local file that syncs from a primary database
//!   via [`Database::sync`], optionally on a background interval.
//!
//! # Example
//!
//! ```rust,ignore
//! use replidb::{Database, Value};
//! use replidb_core::{Cx, Outcome};
//!
//! let cx = Cx::for_testing();
//! let db = match Database::open_local(&cx, ":memory:").await {
//!     Outcome::Ok(db) => db,
//!     Outcome::Err(e) => panic!("open failed: {e}"),
//!     _ => unreachable!(),
//! };
//! let conn = match db.connect(&cx).await {
//!     Outcome::Ok(conn) => conn,
//!     other => panic!("connect failed"),
//! };
//!
//! conn.execute(&cx, "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", ()).await;
//! conn.execute(&cx, "INSERT INTO users (name) VALUES (?)", vec![Value::from("Alice")]).await;
//!
//! if let Outcome::Ok(mut rows) = conn.query(&cx, "SELECT name FROM users", ()).await {
//!     while let Outcome::Ok(Some(row)) = rows.next(&cx).await {
//!         println!("{}", row.get_text(0).unwrap());
//!     }
//! }
//! ```
//!
//! # Thread safety
//!
//! Handles are `Send` but not `Sync`: a handle may move between tasks but
//! is used from one place at a time. Cross-task sharing needs an external
//! mutex, which the compiler will insist on.

pub mod connection;
pub mod database;
pub mod engine;
pub mod ffi;
pub mod rows;
pub mod statement;
pub mod transaction;

mod handle;
mod native;

pub use connection::Connection;
pub use database::{Database, DbConfig};
pub use rows::{Blob, Row, Rows};
pub use statement::Statement;
pub use transaction::{Transaction, TransactionKind};

pub use replidb_core::{
    BindingError, ConfigError, ConfigErrorKind, CursorError, Cx, Error, NativeError, Outcome,
    Params, Replicated, Result, StatementError, StatementErrorKind, Value, ValueType,
};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
    }

    #[test]
    fn test_sqlite_version_number() {
        let num = sqlite_version_number();
        assert!(
            num >= 3_000_000,
            "Expected SQLite 3.x.x (>= 3000000), got {}",
            num
        );
    }
}
