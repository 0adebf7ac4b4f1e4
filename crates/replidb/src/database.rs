//! Database handles and open modes.
//!
//! A database is opened once and then hands out connections. Three modes:
//! plain local files (including `:memory:`), remote URLs (carried but
//! rejected by the embedded engine when a connection is requested), and
//! embedded replicas that sync from a local primary.

use crate::connection::Connection;
use crate::engine;
use crate::handle::NativeHandle;
use crate::native::{check, to_cstring};
use replidb_core::{ConfigError, ConfigErrorKind, Cx, Error, Outcome, Replicated, Result};
use serde::{Deserialize, Serialize};
use std::ffi::{CStr, c_char, c_int};
use std::time::Duration;

/// Options for opening an embedded replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    /// Local path of the replica file.
    pub db_path: Option<String>,
    /// Primary to sync from. A plain path or `file:` URI.
    pub primary_url: Option<String>,
    /// Carried for remote primaries; unused by the embedded engine.
    pub auth_token: Option<String>,
    /// Whether local writes are visible before the next sync.
    pub read_your_writes: bool,
    /// Rejected at open; the embedded engine stores plaintext only.
    pub encryption_key: Option<String>,
    /// When set, a background worker pulls the primary at this interval.
    pub sync_interval: Option<Duration>,
    pub with_webpki: bool,
}

impl DbConfig {
    pub fn new() -> Self {
        Self {
            read_your_writes: true,
            ..Self::default()
        }
    }
}

/// An open database.
///
/// The handle is released exactly once, by [`Database::close`] or on drop,
/// whichever comes first.
#[derive(Debug)]
pub struct Database {
    handle: NativeHandle<engine::EngineDb>,
}

impl Database {
    fn from_raw(ptr: *mut engine::EngineDb) -> Self {
        Self {
            handle: NativeHandle::owned(ptr, engine::close),
        }
    }

    pub(crate) fn open_local_sync(path: &str) -> Result<Self> {
        let cpath = to_cstring(path, "database path")?;
        let mut db: *mut engine::EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: cpath is NUL-terminated, out-parameters point at locals
        let status = unsafe { engine::open_file(cpath.as_ptr(), &mut db, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        tracing::debug!(path, "opened local database");
        Ok(Self::from_raw(db))
    }

    fn open_remote_sync(url: &str, auth_token: &str, with_webpki: bool) -> Result<Self> {
        let curl = to_cstring(url, "remote URL")?;
        let ctoken = to_cstring(auth_token, "auth token")?;
        let mut db: *mut engine::EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: strings are NUL-terminated, out-parameters point at locals
        let status = unsafe {
            engine::open_remote(
                curl.as_ptr(),
                ctoken.as_ptr(),
                c_int::from(with_webpki),
                &mut db,
                &mut err,
            )
        };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        tracing::debug!(url, "opened remote database handle");
        Ok(Self::from_raw(db))
    }

    fn open_with_config_sync(config: &DbConfig) -> Result<Self> {
        let db_path = config.db_path.as_deref().ok_or_else(|| {
            Error::Config(ConfigError::new(
                ConfigErrorKind::MissingField,
                "db_path is required",
            ))
        })?;
        let primary_url = config.primary_url.as_deref().ok_or_else(|| {
            Error::Config(ConfigError::new(
                ConfigErrorKind::MissingField,
                "primary_url is required",
            ))
        })?;

        let cpath = to_cstring(db_path, "database path")?;
        let curl = to_cstring(primary_url, "primary URL")?;
        let ctoken = match config.auth_token.as_deref() {
            Some(token) => Some(to_cstring(token, "auth token")?),
            None => None,
        };
        let ckey = match config.encryption_key.as_deref() {
            Some(key) => Some(to_cstring(key, "encryption key")?),
            None => None,
        };
        let sync_interval_seconds = config
            .sync_interval
            .map_or(0, |d| d.as_secs().min(c_int::MAX as u64) as c_int);

        let raw = engine::EngineConfig {
            db_path: cpath.as_ptr(),
            primary_url: curl.as_ptr(),
            auth_token: ctoken.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
            read_your_writes: c_int::from(config.read_your_writes),
            encryption_key: ckey.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
            sync_interval_seconds,
            with_webpki: c_int::from(config.with_webpki),
        };

        let mut db: *mut engine::EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: raw's strings live until the call returns
        let status = unsafe { engine::open_sync_with_config(&raw, &mut db, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        tracing::debug!(db_path, primary_url, "opened embedded replica");
        Ok(Self::from_raw(db))
    }

    fn open_sync_mode_sync(
        db_path: &str,
        primary_url: &str,
        auth_token: &str,
        read_your_writes: bool,
        with_webpki: bool,
    ) -> Result<Self> {
        let mut config = DbConfig::new();
        config.db_path = Some(db_path.to_string());
        config.primary_url = Some(primary_url.to_string());
        if !auth_token.is_empty() {
            config.auth_token = Some(auth_token.to_string());
        }
        config.read_your_writes = read_your_writes;
        config.with_webpki = with_webpki;
        Self::open_with_config_sync(&config)
    }

    /// Open a local database file. `:memory:` opens a private in-memory
    /// database shared by every connection from this handle.
    pub fn open_local(
        _cx: &Cx,
        path: impl Into<String>,
    ) -> impl Future<Output = Outcome<Self, Error>> + Send {
        let result = Self::open_local_sync(&path.into());
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Record a remote database. The URL is validated here; connecting
    /// fails because the embedded engine is local-only.
    pub fn open_remote(
        _cx: &Cx,
        url: impl Into<String>,
        auth_token: impl Into<String>,
        with_webpki: bool,
    ) -> impl Future<Output = Outcome<Self, Error>> + Send {
        let result = Self::open_remote_sync(&url.into(), &auth_token.into(), with_webpki);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Open an embedded replica that syncs from `primary_url`.
    pub fn open_sync(
        _cx: &Cx,
        db_path: impl Into<String>,
        primary_url: impl Into<String>,
        auth_token: impl Into<String>,
        read_your_writes: bool,
        with_webpki: bool,
    ) -> impl Future<Output = Outcome<Self, Error>> + Send {
        let result = Self::open_sync_mode_sync(
            &db_path.into(),
            &primary_url.into(),
            &auth_token.into(),
            read_your_writes,
            with_webpki,
        );
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Open with the full option set.
    pub fn open_with_config(
        _cx: &Cx,
        config: &DbConfig,
    ) -> impl Future<Output = Outcome<Self, Error>> + Send {
        let result = Self::open_with_config_sync(config);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    pub(crate) fn connect_sync(&self) -> Result<Connection> {
        if self.handle.is_released() {
            return Err(Error::Cursor(replidb_core::CursorError::new(
                "database has been closed",
            )));
        }
        let mut conn: *mut engine::EngineConn = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: the database handle is live, out-parameters point at locals
        let status = unsafe { engine::connect(self.handle.as_ptr(), &mut conn, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        Ok(Connection::owned(conn))
    }

    /// Open a new connection.
    pub fn connect(&self, _cx: &Cx) -> impl Future<Output = Outcome<Connection, Error>> + Send {
        let result = self.connect_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    pub(crate) fn sync_sync(&self) -> Result<Replicated> {
        if self.handle.is_released() {
            return Err(Error::Cursor(replidb_core::CursorError::new(
                "database has been closed",
            )));
        }
        let mut rep = engine::EngineReplicated::default();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: the database handle is live, out-parameters point at locals
        let status = unsafe { engine::sync(self.handle.as_ptr(), &mut rep, &mut err) };
        // SAFETY: status and err came from the call above
        unsafe { check(status, err)? };
        tracing::debug!(
            frame_no = rep.frame_no,
            frames_synced = rep.frames_synced,
            "synced replica"
        );
        Ok(Replicated {
            frame_no: rep.frame_no,
            frames_synced: rep.frames_synced,
        })
    }

    /// Pull the primary into the replica once and report progress.
    pub fn sync(&self, _cx: &Cx) -> impl Future<Output = Outcome<Replicated, Error>> + Send {
        let result = self.sync_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    /// Release the handle. Further calls after close fail; closing again
    /// is a no-op.
    pub fn close(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_read_your_writes() {
        let config = DbConfig::new();
        assert!(config.read_your_writes);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn config_requires_a_path() {
        let err = Database::open_with_config_sync(&DbConfig::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("db_path"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let mut config = DbConfig::new();
        config.db_path = Some("replica.db".to_string());
        config.primary_url = Some("primary.db".to_string());
        config.sync_interval = Some(Duration::from_secs(30));
        let json = serde_json::to_string(&config).unwrap();
        let back: DbConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.db_path.as_deref(), Some("replica.db"));
        assert_eq!(back.sync_interval, Some(Duration::from_secs(30)));
        assert!(back.read_your_writes);
    }

    #[test]
    fn close_is_idempotent_and_poisons_the_handle() {
        let mut db = Database::open_local_sync(":memory:").unwrap();
        db.close();
        db.close();
        assert!(db.connect_sync().is_err());
        assert!(db.sync_sync().is_err());
    }
}
