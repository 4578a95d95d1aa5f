// SPDX-License-Identifier: Apache-2.0

//! Safe bindings to the TensorFlow and TensorFlow Lite C APIs.
//!
//! Graphs are built through [`Graph`] and [`Scope`], executed by a
//! [`Session`] and differentiated with [`ops::gradients`]. Exported models
//! load through [`SavedModelBundle`]. [`lite::Interpreter`] runs TFLite
//! models.

use std::ffi::{c_char, CStr, CString};

#[macro_use]
mod macros;

pub mod buffer;
pub mod error;
pub mod ffi;
pub mod graph;
pub mod handle;
pub mod lite;
pub mod operation;
pub mod ops;
pub mod saved_model;
pub mod scope;
pub mod session;
pub mod status;
pub mod tensor;
pub mod types;

pub use buffer::Buffer;
pub use error::{Code, Error, Result};
pub use graph::Graph;
pub use handle::{Handle, Reference};
pub use operation::{Operation, OperationBuilder, Output};
pub use saved_model::{Loader, SavedModelBundle};
pub use scope::Scope;
pub use session::{Runner, Session, SessionOptions};
pub use status::Status;
pub use tensor::Tensor;
pub use types::{DataType, TensorType};

/// Returns the version of the linked TensorFlow runtime.
pub fn version() -> String {
    unsafe { string_from(ffi::TF_Version()) }
}

pub(crate) fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|e| Error::InvalidArgument(format!("Invalid string '{}': {}", s, e)))
}

/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn string_from(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions() {
        assert!(!version().is_empty());
        assert!(!lite::version().is_empty());
    }

    #[test]
    fn interior_nul() {
        assert!(matches!(cstring("a\0b"), Err(Error::InvalidArgument(_))));
    }
}
