//! Error types for replidb operations.

use std::fmt;

/// The primary error type for all replidb operations.
#[derive(Debug)]
pub enum Error {
    /// The native layer reported a non-zero status.
    Native(NativeError),
    /// Host-side input could not be marshalled across the boundary.
    Binding(BindingError),
    /// A prepared statement was used after its handle was released.
    Statement(StatementError),
    /// A handle (database, connection, cursor, or row) was used after it
    /// was released.
    Cursor(CursorError),
    /// Invalid database configuration.
    Config(ConfigError),
}

/// A failure reported by the native layer.
///
/// `message` carries the engine's error text verbatim. When the engine
/// returns a non-zero status with no message, a generic message naming the
/// status code is substituted so the failure is never silently absorbed.
#[derive(Debug)]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    /// Build from a status code and the optional engine-allocated message.
    pub fn from_status(code: i32, message: Option<String>) -> Self {
        let message = message
            .unwrap_or_else(|| format!("native call failed with status {code}"));
        Self { code, message }
    }
}

/// Host input rejected before any native call was made.
#[derive(Debug)]
pub struct BindingError {
    pub message: String,
}

impl BindingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// The statement was finalized and can no longer run.
    Finalized,
}

impl StatementError {
    pub fn finalized() -> Self {
        Self {
            kind: StatementErrorKind::Finalized,
            message: "statement has been finalized".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct CursorError {
    pub message: String,
}

impl CursorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn released() -> Self {
        Self::new("cursor handle has been released")
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A required path or URL is missing.
    MissingField,
    /// The URL scheme is not supported in this mode.
    UnsupportedScheme,
    /// A field value is malformed (interior NUL, bad interval).
    Invalid,
}

impl ConfigError {
    pub fn new(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Error {
    /// The native status code, when this error came across the boundary.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Error::Native(e) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Native(e) => write!(f, "Native error (status {}): {}", e.code, e.message),
            Error::Binding(e) => write!(f, "Binding error: {}", e.message),
            Error::Statement(e) => write!(f, "Statement error: {}", e.message),
            Error::Cursor(e) => write!(f, "Cursor error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for CursorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        Error::Native(err)
    }
}

impl From<BindingError> for Error {
    fn from(err: BindingError) -> Self {
        Error::Binding(err)
    }
}

impl From<StatementError> for Error {
    fn from(err: StatementError) -> Self {
        Error::Statement(err)
    }
}

impl From<CursorError> for Error {
    fn from(err: CursorError) -> Self {
        Error::Cursor(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for replidb operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_message_passes_through_verbatim() {
        let err = NativeError::from_status(1, Some("no such table: users".to_string()));
        assert_eq!(err.message, "no such table: users");
        assert_eq!(Error::from(err).native_code(), Some(1));
    }

    #[test]
    fn missing_native_message_is_not_silent() {
        let err = NativeError::from_status(7, None);
        assert_eq!(err.message, "native call failed with status 7");
    }

    #[test]
    fn display_includes_status_code() {
        let err = Error::Native(NativeError::from_status(19, Some("constraint failed".into())));
        let msg = err.to_string();
        assert!(msg.contains("19"), "missing status in: {msg}");
        assert!(msg.contains("constraint failed"));
    }

    #[test]
    fn finalized_statement_error_kind() {
        let err = StatementError::finalized();
        assert_eq!(err.kind, StatementErrorKind::Finalized);
        assert!(Error::from(err).native_code().is_none());
    }
}
