//! Driver-side plumbing for boundary calls: status translation and
//! short-lived parameter sets.

use crate::engine;
use replidb_core::{BindingError, Error, NativeError, Result, Value};
use std::ffi::{CStr, CString, c_char, c_int, c_uint};

/// Read and release an engine-allocated error message.
pub(crate) unsafe fn take_text(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: the engine allocated ptr and we release it exactly once
    unsafe {
        let msg = CStr::from_ptr(ptr).to_string_lossy().into_owned();
        engine::free_text(ptr);
        Some(msg)
    }
}

/// Translate a boundary status and error out-parameter into a Result.
/// A non-zero status with no message still produces a descriptive error.
pub(crate) unsafe fn check(status: c_int, err: *mut c_char) -> Result<()> {
    // SAFETY: err came from an engine out-parameter
    let message = unsafe { take_text(err) };
    if status == 0 {
        Ok(())
    } else {
        Err(Error::Native(NativeError::from_status(status, message)))
    }
}

pub(crate) fn to_cstring(s: &str, what: &str) -> Result<CString> {
    CString::new(s)
        .map_err(|_| Error::Binding(BindingError::new(format!("{what} contains a NUL byte"))))
}

/// A positional parameter set built fresh for one boundary call and freed
/// when the call returns.
#[derive(Debug)]
pub(crate) struct PositionalValues {
    set: *mut engine::PositionalSet,
}

impl PositionalValues {
    pub(crate) fn build(values: &[Value]) -> Result<Self> {
        let mut set: *mut engine::PositionalSet = std::ptr::null_mut();
        // SAFETY: out-parameter points at a local
        unsafe {
            engine::alloc_positional(&mut set);
        }
        let built = Self { set };
        for (i, value) in values.iter().enumerate() {
            built.bind(i as c_uint, value)?;
        }
        Ok(built)
    }

    fn bind(&self, index: c_uint, value: &Value) -> Result<()> {
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: the set is live, value buffers outlive the call
        let status = unsafe {
            match value {
                Value::Null => engine::positional_bind_null(self.set, index),
                Value::Integer(v) => engine::positional_bind_int(self.set, index, *v),
                Value::Real(v) => engine::positional_bind_float(self.set, index, *v),
                Value::Text(s) => {
                    let text = to_cstring(s, "text parameter")?;
                    engine::positional_bind_text(self.set, index, text.as_ptr(), &mut err)
                }
                Value::Blob(b) => engine::positional_bind_blob(
                    self.set,
                    index,
                    b.as_ptr(),
                    b.len() as c_int,
                    &mut err,
                ),
            }
        };
        // SAFETY: status and err came from the bind call above
        unsafe { check(status, err) }
    }

    pub(crate) fn as_ptr(&self) -> *const engine::PositionalSet {
        self.set
    }
}

impl Drop for PositionalValues {
    fn drop(&mut self) {
        // SAFETY: the set came from alloc_positional and is freed once
        unsafe { engine::free_positional(self.set) };
    }
}

/// A named parameter set with the same lifetime discipline.
pub(crate) struct NamedValues {
    set: *mut engine::NamedSet,
}

impl NamedValues {
    pub(crate) fn build(values: &[(String, Value)]) -> Result<Self> {
        let mut set: *mut engine::NamedSet = std::ptr::null_mut();
        // SAFETY: out-parameter points at a local
        unsafe {
            engine::alloc_named(&mut set);
        }
        let built = Self { set };
        for (name, value) in values {
            built.bind(name, value)?;
        }
        Ok(built)
    }

    fn bind(&self, name: &str, value: &Value) -> Result<()> {
        let cname = to_cstring(name, "parameter name")?;
        let mut err: *mut c_char = std::ptr::null_mut();
        // SAFETY: the set is live, name and value buffers outlive the call
        let status = unsafe {
            match value {
                Value::Null => engine::named_bind_null(self.set, cname.as_ptr()),
                Value::Integer(v) => engine::named_bind_int(self.set, cname.as_ptr(), *v),
                Value::Real(v) => engine::named_bind_float(self.set, cname.as_ptr(), *v),
                Value::Text(s) => {
                    let text = to_cstring(s, "text parameter")?;
                    engine::named_bind_text(self.set, cname.as_ptr(), text.as_ptr(), &mut err)
                }
                Value::Blob(b) => engine::named_bind_blob(
                    self.set,
                    cname.as_ptr(),
                    b.as_ptr(),
                    b.len() as c_int,
                    &mut err,
                ),
            }
        };
        // SAFETY: status and err came from the bind call above
        unsafe { check(status, err) }
    }

    pub(crate) fn as_ptr(&self) -> *const engine::NamedSet {
        self.set
    }
}

impl Drop for NamedValues {
    fn drop(&mut self) {
        // SAFETY: the set came from alloc_named and is freed once
        unsafe { engine::free_named(self.set) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_messages_through_verbatim() {
        let msg = crate::engine::translate_string("table users already exists".to_string());
        // SAFETY: msg came from the engine allocator
        let err = unsafe { check(1, msg) }.unwrap_err();
        assert_eq!(err.to_string(), "Native error (status 1): table users already exists");
    }

    #[test]
    fn check_generates_a_message_for_silent_failures() {
        // SAFETY: null error pointer is valid
        let err = unsafe { check(7, std::ptr::null_mut()) }.unwrap_err();
        assert!(err.to_string().contains("native call failed with status 7"));
    }

    #[test]
    fn positional_values_round_trip_all_types() {
        let values = vec![
            Value::Integer(1),
            Value::Real(2.5),
            Value::Text("x".into()),
            Value::Blob(vec![1, 2]),
            Value::Null,
        ];
        let set = PositionalValues::build(&values).unwrap();
        assert!(!set.as_ptr().is_null());
    }

    #[test]
    fn nul_bytes_in_parameters_are_binding_errors() {
        let err = PositionalValues::build(&[Value::Text("a\0b".into())]).unwrap_err();
        assert!(matches!(err, Error::Binding(_)));
    }
}
