//! Database handles: local files, in-memory databases, embedded replicas,
//! and the rejection path for remote URLs.
//!
//! A replica pulls its primary with the online backup API. Sync progress is
//! reported from the primary file's header change counter, which moves every
//! time a write transaction commits, so the reported frame number is
//! monotone across pulls.

use super::conn::EngineConn;
use super::{db_error, set_err_msg};
use crate::ffi;
use std::ffi::{CStr, CString, c_char, c_int};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Counter used to give every `:memory:` database its own shared-cache name.
static MEMORY_DB_ID: AtomicU64 = AtomicU64::new(0);

/// Sync progress reported back across the boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineReplicated {
    pub frame_no: u64,
    pub frames_synced: u64,
}

/// Open options for a replica, mirrored field by field on the driver side.
/// String fields may be null when absent.
#[repr(C)]
pub struct EngineConfig {
    pub db_path: *const c_char,
    pub primary_url: *const c_char,
    pub auth_token: *const c_char,
    pub read_your_writes: c_int,
    pub encryption_key: *const c_char,
    pub sync_interval_seconds: c_int,
    pub with_webpki: c_int,
}

#[derive(Debug)]
enum Mode {
    Local,
    Remote { url: String },
    Replica,
}

/// State shared between a replica handle and its background sync worker.
struct SyncShared {
    primary_path: String,
    replica_path: String,
    last_frame_no: Mutex<u64>,
    stop: AtomicBool,
}

pub struct EngineDb {
    mode: Mode,
    /// Path actually handed to the library for connections. For `:memory:`
    /// databases this is a shared-cache URI so every connection sees the
    /// same data.
    open_path: String,
    /// Held open for the lifetime of the handle. Pins shared-cache memory
    /// databases and surfaces unopenable files at open time.
    keeper: *mut ffi::sqlite3,
    sync: Option<Arc<SyncShared>>,
    worker: Option<JoinHandle<()>>,
}

// SAFETY: the raw keeper pointer is only touched from open and Drop, and the
// handle is used from one place at a time.
unsafe impl Send for EngineDb {}

impl Drop for EngineDb {
    fn drop(&mut self) {
        if let Some(shared) = &self.sync {
            shared.stop.store(true, Ordering::SeqCst);
        }
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
        if !self.keeper.is_null() {
            // SAFETY: keeper was opened by us and is closed exactly once here
            unsafe {
                ffi::sqlite3_close_v2(self.keeper);
            }
            self.keeper = std::ptr::null_mut();
        }
    }
}

unsafe fn read_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller passes a NUL-terminated string or null
    let s = unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() };
    if s.is_empty() { None } else { Some(s) }
}

/// Open a raw library connection, translating failure into a message.
unsafe fn open_raw(path: &str, flags: c_int) -> Result<*mut ffi::sqlite3, String> {
    let cpath =
        CString::new(path).map_err(|_| "database path contains a NUL byte".to_string())?;
    let mut db: *mut ffi::sqlite3 = std::ptr::null_mut();
    // SAFETY: cpath is NUL-terminated, db is a valid out-parameter
    let rc = unsafe { ffi::sqlite3_open_v2(cpath.as_ptr(), &mut db, flags, std::ptr::null()) };
    if rc != ffi::SQLITE_OK {
        let msg = if db.is_null() {
            ffi::error_string(rc).to_string()
        } else {
            // SAFETY: a failed open can still return a handle carrying the error
            let msg = unsafe { db_error(db) };
            // SAFETY: the failed handle must still be closed
            unsafe { ffi::sqlite3_close_v2(db) };
            msg
        };
        return Err(msg);
    }
    // SAFETY: db is live after a successful open
    unsafe {
        ffi::sqlite3_busy_timeout(db, 5000);
    }
    Ok(db)
}

fn memory_uri() -> String {
    let id = MEMORY_DB_ID.fetch_add(1, Ordering::Relaxed);
    format!("file:replidb_mem_{id}?mode=memory&cache=shared")
}

fn is_remote_url(url: &str) -> bool {
    ["http://", "https://", "libsql://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

/// Strip a `file:` scheme and any query string, leaving a filesystem path.
fn strip_file_uri(url: &str) -> &str {
    let path = url.strip_prefix("file:").unwrap_or(url);
    match path.find('?') {
        Some(pos) => &path[..pos],
        None => path,
    }
}

/// Read the database header change counter (bytes 24..28, big-endian).
/// A missing or truncated file counts as zero.
fn change_counter(path: &str) -> u64 {
    let mut header = [0u8; 28];
    let Ok(mut file) = std::fs::File::open(path) else {
        return 0;
    };
    if file.read_exact(&mut header).is_err() {
        return 0;
    }
    u64::from(u32::from_be_bytes([header[24], header[25], header[26], header[27]]))
}

/// Copy the primary into the replica and account for progress.
fn pull(shared: &SyncShared) -> Result<(u64, u64), String> {
    // SAFETY: paths were validated at open, handles are closed on every path
    unsafe {
        let src = open_raw(
            &shared.primary_path,
            ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_URI,
        )?;
        let dst = match open_raw(
            &shared.replica_path,
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI,
        ) {
            Ok(dst) => dst,
            Err(e) => {
                ffi::sqlite3_close_v2(src);
                return Err(e);
            }
        };

        let backup = ffi::sqlite3_backup_init(dst, c"main".as_ptr(), src, c"main".as_ptr());
        if backup.is_null() {
            let msg = db_error(dst);
            ffi::sqlite3_close_v2(dst);
            ffi::sqlite3_close_v2(src);
            return Err(msg);
        }

        let step_rc = ffi::sqlite3_backup_step(backup, -1);
        let finish_rc = ffi::sqlite3_backup_finish(backup);
        ffi::sqlite3_close_v2(dst);
        ffi::sqlite3_close_v2(src);

        if step_rc != ffi::SQLITE_DONE {
            return Err(format!("sync failed: {}", ffi::error_string(step_rc)));
        }
        if finish_rc != ffi::SQLITE_OK {
            return Err(format!("sync failed: {}", ffi::error_string(finish_rc)));
        }
    }

    let counter = change_counter(strip_file_uri(&shared.primary_path));
    let mut last = shared
        .last_frame_no
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    let frame_no = (*last).max(counter);
    let frames_synced = frame_no - *last;
    *last = frame_no;
    Ok((frame_no, frames_synced))
}

fn spawn_worker(shared: Arc<SyncShared>, interval: Duration) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            std::thread::park_timeout(interval);
            if shared.stop.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = pull(&shared) {
                tracing::warn!(error = %e, "background sync pull failed");
            }
        }
    })
}

/// Open a local database. `:memory:` is rewritten to a shared-cache URI so
/// every connection from this handle sees the same data.
pub unsafe fn open_file(
    path: *const c_char,
    out_db: *mut *mut EngineDb,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: caller passes a NUL-terminated path
    let Some(path) = (unsafe { read_arg(path) }) else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("database path is empty".to_string(), out_err) };
        return 1;
    };
    let open_path = if path == ":memory:" { memory_uri() } else { path };

    // SAFETY: open_path is a valid path or URI
    let keeper = match unsafe {
        open_raw(
            &open_path,
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI,
        )
    } {
        Ok(db) => db,
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            return 1;
        }
    };

    let db = Box::new(EngineDb {
        mode: Mode::Local,
        open_path,
        keeper,
        sync: None,
        worker: None,
    });
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_db = Box::into_raw(db);
    }
    0
}

/// Record a remote database. The URL scheme is validated here; actually
/// connecting is rejected later because this engine is local-only.
pub unsafe fn open_remote(
    url: *const c_char,
    auth_token: *const c_char,
    _with_webpki: c_int,
    out_db: *mut *mut EngineDb,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: caller passes a NUL-terminated URL
    let Some(url) = (unsafe { read_arg(url) }) else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("remote URL is empty".to_string(), out_err) };
        return 1;
    };
    if !is_remote_url(&url) {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe {
            set_err_msg(format!("unsupported remote URL scheme: {url}"), out_err);
        }
        return 1;
    }
    // The token is accepted for interface parity but never used locally.
    // SAFETY: caller passes a NUL-terminated token or null
    let _ = unsafe { read_arg(auth_token) };

    let db = Box::new(EngineDb {
        mode: Mode::Remote { url },
        open_path: String::new(),
        keeper: std::ptr::null_mut(),
        sync: None,
        worker: None,
    });
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_db = Box::into_raw(db);
    }
    0
}

/// Open an embedded replica of a local primary and pull it once to
/// establish the sync baseline.
pub unsafe fn open_sync_with_config(
    config: &EngineConfig,
    out_db: *mut *mut EngineDb,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: config fields are NUL-terminated strings or null
    let (db_path, primary_url) = unsafe {
        let db_path = read_arg(config.db_path);
        let primary_url = read_arg(config.primary_url);
        (db_path, primary_url)
    };
    let Some(db_path) = db_path else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("replica path is empty".to_string(), out_err) };
        return 1;
    };
    let Some(primary_url) = primary_url else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("primary URL is empty".to_string(), out_err) };
        return 1;
    };
    // SAFETY: encryption_key is a NUL-terminated string or null
    if unsafe { read_arg(config.encryption_key) }.is_some() {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe {
            set_err_msg(
                "encryption is not supported by the embedded engine".to_string(),
                out_err,
            );
        }
        return 1;
    }
    if is_remote_url(&primary_url) {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe {
            set_err_msg(
                format!("cannot sync from a remote primary with the embedded engine: {primary_url}"),
                out_err,
            );
        }
        return 1;
    }
    if !std::path::Path::new(strip_file_uri(&primary_url)).exists() {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe {
            set_err_msg(format!("primary database not found: {primary_url}"), out_err);
        }
        return 1;
    }

    // SAFETY: db_path was validated non-empty above
    let keeper = match unsafe {
        open_raw(
            &db_path,
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI,
        )
    } {
        Ok(db) => db,
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            return 1;
        }
    };

    let shared = Arc::new(SyncShared {
        primary_path: primary_url,
        replica_path: db_path.clone(),
        last_frame_no: Mutex::new(0),
        stop: AtomicBool::new(false),
    });

    if let Err(e) = pull(&shared) {
        // SAFETY: keeper was opened above and is abandoned on this path
        unsafe { ffi::sqlite3_close_v2(keeper) };
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg(e, out_err) };
        return 1;
    }

    let worker = if config.sync_interval_seconds > 0 {
        let interval = Duration::from_secs(config.sync_interval_seconds as u64);
        Some(spawn_worker(Arc::clone(&shared), interval))
    } else {
        None
    };

    let db = Box::new(EngineDb {
        mode: Mode::Replica,
        open_path: db_path,
        keeper,
        sync: Some(shared),
        worker,
    });
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_db = Box::into_raw(db);
    }
    0
}

/// Release a database handle. Null is a no-op; release happens exactly once.
pub unsafe fn close(db: *mut EngineDb) {
    if !db.is_null() {
        // SAFETY: the pointer came from one of the open entry points
        let _ = unsafe { Box::from_raw(db) };
    }
}

/// Open a new connection against the database.
pub unsafe fn connect(
    db: *const EngineDb,
    out_conn: *mut *mut EngineConn,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: db came from an open entry point and is still live
    let handle = unsafe { &*db };
    if let Mode::Remote { url } = &handle.mode {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe {
            set_err_msg(
                format!("remote databases are not supported by the embedded engine: {url}"),
                out_err,
            );
        }
        return 1;
    }

    // SAFETY: open_path was validated when the handle was created
    let raw = match unsafe {
        open_raw(
            &handle.open_path,
            ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_URI,
        )
    } {
        Ok(raw) => raw,
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            return 1;
        }
    };

    let conn = Box::new(EngineConn::new(raw));
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_conn = Box::into_raw(conn);
    }
    0
}

/// Pull the primary into the replica once. Fails on handles that were not
/// opened for sync.
pub unsafe fn sync(
    db: *mut EngineDb,
    out_replicated: *mut EngineReplicated,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: db came from an open entry point and is still live
    let handle = unsafe { &*db };
    let Some(shared) = &handle.sync else {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe {
            set_err_msg("database is not configured for sync".to_string(), out_err);
        }
        return 1;
    };
    match pull(shared) {
        Ok((frame_no, frames_synced)) => {
            if !out_replicated.is_null() {
                // SAFETY: caller supplied a valid out-parameter
                unsafe {
                    *out_replicated = EngineReplicated {
                        frame_no,
                        frames_synced,
                    };
                }
            }
            0
        }
        Err(e) => {
            // SAFETY: out_err is checked inside set_err_msg
            unsafe { set_err_msg(e, out_err) };
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine;

    unsafe fn take_err(err: *mut c_char) -> String {
        assert!(!err.is_null());
        // SAFETY: err came from set_err_msg
        unsafe {
            let msg = CStr::from_ptr(err).to_string_lossy().into_owned();
            engine::free_text(err);
            msg
        }
    }

    #[test]
    fn memory_databases_share_data_between_connections() {
        let mut db: *mut EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals, handles released below
        unsafe {
            assert_eq!(open_file(c":memory:".as_ptr(), &mut db, &mut err), 0);

            let mut a: *mut EngineConn = std::ptr::null_mut();
            let mut b: *mut EngineConn = std::ptr::null_mut();
            assert_eq!(connect(db, &mut a, &mut err), 0);
            assert_eq!(connect(db, &mut b, &mut err), 0);

            let mut changes = 0u64;
            assert_eq!(
                engine::execute(a, c"CREATE TABLE t (x INTEGER)".as_ptr(), &mut changes, &mut err),
                0
            );
            assert_eq!(
                engine::execute(a, c"INSERT INTO t VALUES (7)".as_ptr(), &mut changes, &mut err),
                0
            );
            assert_eq!(changes, 1);

            // The second connection sees the first connection's table.
            assert_eq!(
                engine::execute(b, c"INSERT INTO t VALUES (8)".as_ptr(), &mut changes, &mut err),
                0
            );

            engine::disconnect(a);
            engine::disconnect(b);
            close(db);
        }
    }

    #[test]
    fn distinct_memory_databases_do_not_share() {
        let mut db1: *mut EngineDb = std::ptr::null_mut();
        let mut db2: *mut EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals, handles released below
        unsafe {
            assert_eq!(open_file(c":memory:".as_ptr(), &mut db1, &mut err), 0);
            assert_eq!(open_file(c":memory:".as_ptr(), &mut db2, &mut err), 0);

            let mut a: *mut EngineConn = std::ptr::null_mut();
            let mut b: *mut EngineConn = std::ptr::null_mut();
            assert_eq!(connect(db1, &mut a, &mut err), 0);
            assert_eq!(connect(db2, &mut b, &mut err), 0);

            let mut changes = 0u64;
            assert_eq!(
                engine::execute(a, c"CREATE TABLE t (x INTEGER)".as_ptr(), &mut changes, &mut err),
                0
            );
            // db2 never saw the CREATE TABLE.
            assert_eq!(
                engine::execute(b, c"INSERT INTO t VALUES (1)".as_ptr(), &mut changes, &mut err),
                1
            );
            let msg = take_err(err);
            assert!(msg.contains("no such table"), "{msg}");

            engine::disconnect(a);
            engine::disconnect(b);
            close(db1);
            close(db2);
        }
    }

    #[test]
    fn remote_handles_fail_at_connect() {
        let mut db: *mut EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals, handle released below
        unsafe {
            assert_eq!(
                open_remote(
                    c"libsql://example.turso.io".as_ptr(),
                    c"token".as_ptr(),
                    1,
                    &mut db,
                    &mut err,
                ),
                0
            );
            let mut conn: *mut EngineConn = std::ptr::null_mut();
            assert_eq!(connect(db, &mut conn, &mut err), 1);
            let msg = take_err(err);
            assert!(msg.contains("remote databases are not supported"), "{msg}");
            close(db);
        }
    }

    #[test]
    fn remote_scheme_is_validated_at_open() {
        let mut db: *mut EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals
        unsafe {
            assert_eq!(
                open_remote(c"ftp://nope".as_ptr(), std::ptr::null(), 0, &mut db, &mut err),
                1
            );
            let msg = take_err(err);
            assert!(msg.contains("unsupported remote URL scheme"), "{msg}");
        }
    }

    #[test]
    fn sync_requires_a_replica_handle() {
        let mut db: *mut EngineDb = std::ptr::null_mut();
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: out-parameters point at locals, handle released below
        unsafe {
            assert_eq!(open_file(c":memory:".as_ptr(), &mut db, &mut err), 0);
            let mut rep = EngineReplicated::default();
            assert_eq!(sync(db, &mut rep, &mut err), 1);
            let msg = take_err(err);
            assert!(msg.contains("not configured for sync"), "{msg}");
            close(db);
        }
    }

    #[test]
    fn change_counter_of_missing_file_is_zero() {
        assert_eq!(change_counter("/nonexistent/replidb-test.db"), 0);
    }

    #[test]
    fn strip_file_uri_handles_scheme_and_query() {
        assert_eq!(strip_file_uri("file:/tmp/a.db?mode=ro"), "/tmp/a.db");
        assert_eq!(strip_file_uri("/tmp/a.db"), "/tmp/a.db");
    }
}
