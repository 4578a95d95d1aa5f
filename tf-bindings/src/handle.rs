// SPDX-License-Identifier: Apache-2.0

use crate::{Error, Result};
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Core trait for components that own a native object.
pub trait Handle: Sized {
    /// The underlying C type this handle wraps.
    type CType;

    /// Returns the raw pointer for FFI calls (immutable access).
    fn as_ptr(&self) -> *const Self::CType;

    /// Returns the raw mutable pointer for FFI calls that require mutation.
    fn as_mut_ptr(&mut self) -> *mut Self::CType;

    /// Takes ownership of a native object, deleting it on drop.
    ///
    /// # Safety
    ///
    /// - `ptr` must be null or a valid pointer to the C type.
    /// - No one else may delete the object afterwards.
    unsafe fn from_ptr(ptr: *mut Self::CType) -> Result<Self>;
}

struct State<T> {
    ptr: Option<NonNull<T>>,
    refs: usize,
    closing: bool,
}

/// A native pointer shared between threads and pinned by [`Reference`]s.
///
/// Closing waits until every outstanding reference is released, then hands
/// the pointer to the deleter exactly once. No reference can be taken after
/// closing has started.
pub(crate) struct NativeHandle<T> {
    state: Mutex<State<T>>,
    drained: Condvar,
    closed: fn() -> Error,
}

// The pointer is only dereferenced under a pin, and the pin count is
// guarded by the mutex.
unsafe impl<T> Send for NativeHandle<T> {}
unsafe impl<T> Sync for NativeHandle<T> {}

impl<T> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("NativeHandle")
            .field("ptr", &state.ptr)
            .field("refs", &state.refs)
            .field("closing", &state.closing)
            .finish()
    }
}

impl<T> NativeHandle<T> {
    /// Wraps `ptr`; `closed` builds the error returned once it is gone.
    pub(crate) fn new(ptr: NonNull<T>, closed: fn() -> Error) -> Self {
        NativeHandle {
            state: Mutex::new(State {
                ptr: Some(ptr),
                refs: 0,
                closing: false,
            }),
            drained: Condvar::new(),
            closed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pins the pointer until the returned reference is dropped.
    pub(crate) fn reference(&self) -> Result<Reference<'_, T>> {
        let mut state = self.lock();
        match state.ptr {
            Some(ptr) if !state.closing => {
                state.refs += 1;
                Ok(Reference { handle: self, ptr })
            }
            _ => Err((self.closed)()),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        let state = self.lock();
        state.closing || state.ptr.is_none()
    }

    /// Waits for outstanding references and deletes the pointer.
    ///
    /// Calls after the first are no-ops. Must not be called while the
    /// current thread holds a reference to the same handle.
    pub(crate) fn close(&self, delete: impl FnOnce(NonNull<T>) -> Result<()>) -> Result<()> {
        let mut state = self.lock();
        if state.closing || state.ptr.is_none() {
            return Ok(());
        }

        state.closing = true;
        while state.refs > 0 {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let ptr = state.ptr.take();
        drop(state);

        match ptr {
            Some(ptr) => delete(ptr),
            None => Ok(()),
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        state.refs = state.refs.saturating_sub(1);
        if state.refs == 0 {
            self.drained.notify_all();
        }
    }
}

/// A scoped pin on a [`NativeHandle`].
///
/// The pointer it exposes stays valid until the reference is released,
/// either explicitly or when it goes out of scope.
pub struct Reference<'a, T> {
    handle: &'a NativeHandle<T>,
    ptr: NonNull<T>,
}

impl<T> fmt::Debug for Reference<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Reference").field("ptr", &self.ptr).finish()
    }
}

impl<T> Reference<'_, T> {
    /// Returns the pinned native pointer.
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Releases the pin.
    pub fn release(self) {}
}

impl<T> Drop for Reference<'_, T> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn handle(value: &mut u32) -> NativeHandle<u32> {
        NativeHandle::new(NonNull::from(value), || Error::GraphClosed)
    }

    #[test]
    fn reference_after_close_fails() {
        let mut value = 7;
        let h = handle(&mut value);

        let r = h.reference().unwrap();
        assert_eq!(unsafe { *r.as_ptr() }, 7);
        r.release();

        let mut deleted = 0;
        h.close(|_| {
            deleted += 1;
            Ok(())
        })
        .unwrap();
        h.close(|_| {
            deleted += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(deleted, 1);
        assert!(h.is_closed());
        assert!(matches!(h.reference(), Err(Error::GraphClosed)));
    }

    #[test]
    fn close_waits_for_references() {
        let value = Box::leak(Box::new(1u32));
        let h = Arc::new(handle(value));
        let released = Arc::new(AtomicBool::new(false));

        let r = h.reference().unwrap();
        let closer = {
            let h = h.clone();
            let released = released.clone();
            thread::spawn(move || {
                h.close(|_| {
                    assert!(released.load(Ordering::SeqCst));
                    Ok(())
                })
            })
        };

        while !h.is_closed() {
            thread::sleep(Duration::from_millis(1));
        }
        // Closing has begun, so no new pins are handed out.
        assert!(h.reference().is_err());
        released.store(true, Ordering::SeqCst);
        drop(r);

        closer.join().unwrap().unwrap();
        assert!(h.is_closed());
    }
}
