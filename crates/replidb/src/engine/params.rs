//! Parameter sets and value marshalling for the engine boundary.
//!
//! A parameter set is allocated through the boundary, populated with typed
//! bind calls, passed to a query or execute entry point, and then released
//! by the caller. Sets never outlive a single call site on the driver side.

use super::set_err_msg;
use crate::ffi;
use replidb_core::Value;
use std::ffi::{CStr, c_char, c_int, c_uint};

/// Positional parameters, 0-based on this side of the boundary.
/// Binding index `n` grows the set with trailing NULLs as needed.
#[derive(Debug, Default)]
pub struct PositionalSet {
    values: Vec<Value>,
}

impl PositionalSet {
    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }

    fn put(&mut self, index: usize, value: Value) {
        if index >= self.values.len() {
            self.values.resize(index + 1, Value::Null);
        }
        self.values[index] = value;
    }
}

/// Named parameters. Duplicate names are kept in insertion order and the
/// last occurrence wins when the set is applied to a statement.
#[derive(Debug, Default)]
pub struct NamedSet {
    values: Vec<(String, Value)>,
}

impl NamedSet {
    pub(crate) fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    fn put(&mut self, name: String, value: Value) {
        self.values.push((name, value));
    }
}

pub unsafe fn alloc_positional(out_set: *mut *mut PositionalSet) -> c_int {
    let set = Box::new(PositionalSet::default());
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_set = Box::into_raw(set);
    }
    0
}

pub unsafe fn free_positional(set: *mut PositionalSet) {
    if !set.is_null() {
        // SAFETY: the pointer came from alloc_positional
        let _ = unsafe { Box::from_raw(set) };
    }
}

pub unsafe fn alloc_named(out_set: *mut *mut NamedSet) -> c_int {
    let set = Box::new(NamedSet::default());
    // SAFETY: caller supplied a valid out-parameter
    unsafe {
        *out_set = Box::into_raw(set);
    }
    0
}

pub unsafe fn free_named(set: *mut NamedSet) {
    if !set.is_null() {
        // SAFETY: the pointer came from alloc_named
        let _ = unsafe { Box::from_raw(set) };
    }
}

unsafe fn read_text(value: *const c_char, out_err: *mut *mut c_char) -> Result<String, c_int> {
    if value.is_null() {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("text value pointer is null".to_string(), out_err) };
        return Err(1);
    }
    // SAFETY: value is a NUL-terminated string owned by the caller
    Ok(unsafe { CStr::from_ptr(value).to_string_lossy().into_owned() })
}

pub unsafe fn positional_bind_int(set: *mut PositionalSet, index: c_uint, value: i64) -> c_int {
    // SAFETY: set came from alloc_positional and is still live
    unsafe { (*set).put(index as usize, Value::Integer(value)) };
    0
}

pub unsafe fn positional_bind_float(set: *mut PositionalSet, index: c_uint, value: f64) -> c_int {
    // SAFETY: set came from alloc_positional and is still live
    unsafe { (*set).put(index as usize, Value::Real(value)) };
    0
}

pub unsafe fn positional_bind_null(set: *mut PositionalSet, index: c_uint) -> c_int {
    // SAFETY: set came from alloc_positional and is still live
    unsafe { (*set).put(index as usize, Value::Null) };
    0
}

pub unsafe fn positional_bind_text(
    set: *mut PositionalSet,
    index: c_uint,
    value: *const c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let text = match unsafe { read_text(value, out_err) } {
        Ok(text) => text,
        Err(status) => return status,
    };
    // SAFETY: set came from alloc_positional and is still live
    unsafe { (*set).put(index as usize, Value::Text(text)) };
    0
}

pub unsafe fn positional_bind_blob(
    set: *mut PositionalSet,
    index: c_uint,
    value: *const u8,
    len: c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    if value.is_null() && len > 0 {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("blob value pointer is null".to_string(), out_err) };
        return 1;
    }
    let bytes = if len <= 0 {
        Vec::new()
    } else {
        // SAFETY: caller guarantees value points to len readable bytes
        unsafe { std::slice::from_raw_parts(value, len as usize).to_vec() }
    };
    // SAFETY: set came from alloc_positional and is still live
    unsafe { (*set).put(index as usize, Value::Blob(bytes)) };
    0
}

pub unsafe fn named_bind_int(set: *mut NamedSet, name: *const c_char, value: i64) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let name = match unsafe { read_text(name, std::ptr::null_mut()) } {
        Ok(name) => name,
        Err(status) => return status,
    };
    // SAFETY: set came from alloc_named and is still live
    unsafe { (*set).put(name, Value::Integer(value)) };
    0
}

pub unsafe fn named_bind_float(set: *mut NamedSet, name: *const c_char, value: f64) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let name = match unsafe { read_text(name, std::ptr::null_mut()) } {
        Ok(name) => name,
        Err(status) => return status,
    };
    // SAFETY: set came from alloc_named and is still live
    unsafe { (*set).put(name, Value::Real(value)) };
    0
}

pub unsafe fn named_bind_null(set: *mut NamedSet, name: *const c_char) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let name = match unsafe { read_text(name, std::ptr::null_mut()) } {
        Ok(name) => name,
        Err(status) => return status,
    };
    // SAFETY: set came from alloc_named and is still live
    unsafe { (*set).put(name, Value::Null) };
    0
}

pub unsafe fn named_bind_text(
    set: *mut NamedSet,
    name: *const c_char,
    value: *const c_char,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let name = match unsafe { read_text(name, out_err) } {
        Ok(name) => name,
        Err(status) => return status,
    };
    // SAFETY: forwarded caller pointers, checked inside
    let text = match unsafe { read_text(value, out_err) } {
        Ok(text) => text,
        Err(status) => return status,
    };
    // SAFETY: set came from alloc_named and is still live
    unsafe { (*set).put(name, Value::Text(text)) };
    0
}

pub unsafe fn named_bind_blob(
    set: *mut NamedSet,
    name: *const c_char,
    value: *const u8,
    len: c_int,
    out_err: *mut *mut c_char,
) -> c_int {
    // SAFETY: forwarded caller pointers, checked inside
    let name = match unsafe { read_text(name, out_err) } {
        Ok(name) => name,
        Err(status) => return status,
    };
    if value.is_null() && len > 0 {
        // SAFETY: out_err is checked inside set_err_msg
        unsafe { set_err_msg("blob value pointer is null".to_string(), out_err) };
        return 1;
    }
    let bytes = if len <= 0 {
        Vec::new()
    } else {
        // SAFETY: caller guarantees value points to len readable bytes
        unsafe { std::slice::from_raw_parts(value, len as usize).to_vec() }
    };
    // SAFETY: set came from alloc_named and is still live
    unsafe { (*set).put(name, Value::Blob(bytes)) };
    0
}

/// Bind a single value to a 1-based statement parameter index.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub(crate) unsafe fn bind_value(
    stmt: *mut ffi::sqlite3_stmt,
    index: c_int,
    value: &Value,
) -> c_int {
    // SAFETY: upheld by the caller for every arm below
    unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Integer(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Real(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => {
                let bytes = s.as_bytes();
                ffi::sqlite3_bind_text(
                    stmt,
                    index,
                    bytes.as_ptr().cast(),
                    bytes.len() as c_int,
                    ffi::SQLITE_TRANSIENT,
                )
            }
            Value::Blob(b) => ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::SQLITE_TRANSIENT,
            ),
        }
    }
}

/// Apply a positional set to a statement. Indices shift to 1-based here.
pub(crate) unsafe fn apply_positional(
    stmt: *mut ffi::sqlite3_stmt,
    values: &[Value],
) -> Result<(), c_int> {
    for (i, value) in values.iter().enumerate() {
        // SAFETY: stmt is live, index derived from the set length
        let rc = unsafe { bind_value(stmt, (i + 1) as c_int, value) };
        if rc != ffi::SQLITE_OK {
            return Err(rc);
        }
    }
    Ok(())
}

/// Look up a named parameter, trying the name verbatim and then with each
/// of the prefixes SQLite accepts. Returns 0 when the statement has no
/// parameter by that name.
unsafe fn named_index(stmt: *mut ffi::sqlite3_stmt, name: &str) -> c_int {
    let candidates: [String; 4] = [
        name.to_string(),
        format!(":{name}"),
        format!("@{name}"),
        format!("${name}"),
    ];
    for candidate in &candidates {
        let Ok(cname) = std::ffi::CString::new(candidate.as_str()) else {
            continue;
        };
        // SAFETY: stmt is live, cname is NUL-terminated
        let index = unsafe { ffi::sqlite3_bind_parameter_index(stmt, cname.as_ptr()) };
        if index > 0 {
            return index;
        }
    }
    0
}

/// Apply a named set to a statement. Names absent from the statement are
/// skipped; a skipped name is not an error.
pub(crate) unsafe fn apply_named(
    stmt: *mut ffi::sqlite3_stmt,
    values: &[(String, Value)],
) -> Result<(), c_int> {
    for (name, value) in values {
        // SAFETY: stmt is live
        let index = unsafe { named_index(stmt, name) };
        if index == 0 {
            continue;
        }
        // SAFETY: index came from sqlite3_bind_parameter_index
        let rc = unsafe { bind_value(stmt, index, value) };
        if rc != ffi::SQLITE_OK {
            return Err(rc);
        }
    }
    Ok(())
}
