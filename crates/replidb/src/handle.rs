//! RAII wrapper for engine handles.
//!
//! Guarantees the release discipline of the boundary: an owned handle is
//! released exactly once (explicitly or on drop), a borrowed handle is
//! never released, and every use checks validity first.

pub(crate) struct NativeHandle<T> {
    ptr: *mut T,
    released: bool,
    destroy: Option<unsafe fn(*mut T)>,
}

impl<T> std::fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHandle")
            .field("ptr", &self.ptr)
            .field("released", &self.released)
            .finish()
    }
}

// SAFETY: the wrapped engine handles are used from one place at a time.
unsafe impl<T> Send for NativeHandle<T> {}

impl<T> NativeHandle<T> {
    /// Wrap a handle this side owns. `destroy` runs exactly once.
    pub(crate) fn owned(ptr: *mut T, destroy: unsafe fn(*mut T)) -> Self {
        Self {
            ptr,
            released: false,
            destroy: Some(destroy),
        }
    }

    /// Wrap a handle owned elsewhere. Release is a no-op.
    pub(crate) fn borrowed(ptr: *mut T) -> Self {
        Self {
            ptr,
            released: false,
            destroy: None,
        }
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released || self.ptr.is_null()
    }

    /// Release the handle. Safe to call more than once.
    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(destroy) = self.destroy {
            if !self.ptr.is_null() {
                // SAFETY: owned pointer, released exactly once by the flag above
                unsafe { destroy(self.ptr) };
            }
        }
    }

    /// Hand ownership to the caller without running the destructor. Used
    /// for engine calls that consume the handle themselves.
    pub(crate) fn take(&mut self) -> *mut T {
        self.released = true;
        self.ptr
    }
}

impl<T> Drop for NativeHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}
