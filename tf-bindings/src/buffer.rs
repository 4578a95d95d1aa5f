// SPDX-License-Identifier: Apache-2.0

use crate::{ffi, Handle, Result};

define_component!(
    /// Wrapper for the `TF_Buffer` C object.
    ///
    /// Carries serialized protos (configs, run options, metadata) across the
    /// boundary.
    #[derive(Debug)]
    pub Buffer,
    ffi::TF_Buffer,
    drop: TF_DeleteBuffer
);

impl Buffer {
    /// Creates a new empty `Buffer`.
    pub fn new() -> Result<Self> {
        unsafe { Self::from_ptr(ffi::TF_NewBuffer()) }
    }

    /// Creates a new `Buffer` holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        unsafe {
            Self::from_ptr(ffi::TF_NewBufferFromString(
                bytes.as_ptr() as *const _,
                bytes.len(),
            ))
        }
    }

    /// Returns the contents of the `Buffer`.
    pub fn as_bytes(&self) -> &[u8] {
        let inner = unsafe { &*self.as_ptr() };
        if inner.data.is_null() || inner.length == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(inner.data as *const u8, inner.length) }
        }
    }

    /// Returns a copy of the contents of the `Buffer`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_a_copy() {
        let mut data = vec![1u8, 2, 3];
        let buffer = Buffer::from_bytes(&data).unwrap();
        data[0] = 9;
        assert_eq!(buffer.as_bytes(), &[1, 2, 3]);

        assert!(Buffer::new().unwrap().as_bytes().is_empty());
    }
}
