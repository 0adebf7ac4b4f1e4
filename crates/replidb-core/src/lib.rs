//! Core types for the replidb driver.
//!
//! This crate provides the foundational pieces shared by any replidb front end:
//!
//! - `Value` for dynamically-typed SQL values crossing the native boundary
//! - `Params` for positional and named parameter sets
//! - `Error` taxonomy covering binding, native, and lifecycle failures
//! - `Replicated` sync progress reports
//! - `Outcome`/`Cx` re-exports from asupersync for cancel-correct operations

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub mod error;
pub mod params;
pub mod replicated;
pub mod value;

pub use error::{
    BindingError, ConfigError, ConfigErrorKind, CursorError, Error, NativeError, Result,
    StatementError, StatementErrorKind,
};
pub use params::Params;
pub use replicated::Replicated;
pub use value::{Value, ValueType};
