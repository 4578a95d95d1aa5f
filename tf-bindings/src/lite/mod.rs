// SPDX-License-Identifier: Apache-2.0

//! TensorFlow Lite inference.

pub mod buffer;
pub mod interpreter;
pub mod model;
pub mod options;
pub mod tensor;

pub use buffer::{ArrayData, InputBuffer, NdArray, OutputBuffer};
pub use interpreter::Interpreter;
pub use model::Model;
pub use options::{Delegate, Options, OptionsBuilder};
pub use tensor::Tensor;

use crate::{ffi, string_from};

/// Returns the version of the linked TensorFlow Lite runtime.
pub fn version() -> String {
    unsafe { string_from(ffi::TfLiteVersion()) }
}
