// SPDX-License-Identifier: Apache-2.0

//! In-process mock of the C API subset used by the crate.
//!
//! Only compiled with the `builtin-runtime` feature, which the test suite
//! enables so it can run without libtensorflow. It mirrors the names,
//! signatures and ownership rules of `tensorflow/c/c_api.h` and
//! `tensorflow/lite/c/c_api.h`: objects are heap allocated and handed out as
//! raw pointers, failures are reported through `TF_Status` / `TfLiteStatus`.
//! Models are a line-oriented text form (see `text`), and graphs are
//! evaluated by a handful of numeric kernels.

use std::ffi::{c_char, c_uint, c_void};

mod eval;
mod gradients;
mod graph;
mod lite;
mod session;
mod status;
mod tensor;
mod text;

pub use gradients::TF_AddGradientsWithPrefix;
pub use graph::*;
pub use lite::*;
pub use session::*;
pub use status::*;
pub use tensor::*;

pub type TF_Code = c_uint;
pub const TF_OK: TF_Code = 0;
pub const TF_CANCELLED: TF_Code = 1;
pub const TF_UNKNOWN: TF_Code = 2;
pub const TF_INVALID_ARGUMENT: TF_Code = 3;
pub const TF_DEADLINE_EXCEEDED: TF_Code = 4;
pub const TF_NOT_FOUND: TF_Code = 5;
pub const TF_ALREADY_EXISTS: TF_Code = 6;
pub const TF_PERMISSION_DENIED: TF_Code = 7;
pub const TF_RESOURCE_EXHAUSTED: TF_Code = 8;
pub const TF_FAILED_PRECONDITION: TF_Code = 9;
pub const TF_ABORTED: TF_Code = 10;
pub const TF_OUT_OF_RANGE: TF_Code = 11;
pub const TF_UNIMPLEMENTED: TF_Code = 12;
pub const TF_INTERNAL: TF_Code = 13;
pub const TF_UNAVAILABLE: TF_Code = 14;
pub const TF_DATA_LOSS: TF_Code = 15;
pub const TF_UNAUTHENTICATED: TF_Code = 16;

pub type TF_DataType = c_uint;
pub const TF_FLOAT: TF_DataType = 1;
pub const TF_DOUBLE: TF_DataType = 2;
pub const TF_INT32: TF_DataType = 3;
pub const TF_UINT8: TF_DataType = 4;
pub const TF_INT16: TF_DataType = 5;
pub const TF_INT8: TF_DataType = 6;
pub const TF_STRING: TF_DataType = 7;
pub const TF_INT64: TF_DataType = 9;
pub const TF_BOOL: TF_DataType = 10;

pub type TfLiteType = c_uint;
pub const kTfLiteNoType: TfLiteType = 0;
pub const kTfLiteFloat32: TfLiteType = 1;
pub const kTfLiteInt32: TfLiteType = 2;
pub const kTfLiteUInt8: TfLiteType = 3;
pub const kTfLiteInt64: TfLiteType = 4;
pub const kTfLiteString: TfLiteType = 5;
pub const kTfLiteBool: TfLiteType = 6;

pub type TfLiteStatus = c_uint;
pub const kTfLiteOk: TfLiteStatus = 0;
pub const kTfLiteError: TfLiteStatus = 1;

static TF_VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "-builtin\0").as_bytes();
static TFLITE_VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "-builtin-lite\0").as_bytes();

pub unsafe fn TF_Version() -> *const c_char {
    TF_VERSION.as_ptr() as *const c_char
}

pub unsafe fn TfLiteVersion() -> *const c_char {
    TFLITE_VERSION.as_ptr() as *const c_char
}

/// A single endpoint of an operation.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct TF_Output {
    pub oper: *mut TF_Operation,
    pub index: std::ffi::c_int,
}

impl Default for TF_Output {
    fn default() -> Self {
        TF_Output {
            oper: std::ptr::null_mut(),
            index: 0,
        }
    }
}

/// Serialized bytes handed across the boundary.
#[repr(C)]
#[derive(Debug)]
pub struct TF_Buffer {
    pub data: *const c_void,
    pub length: usize,
    pub data_deallocator: Option<unsafe extern "C" fn(data: *mut c_void, length: usize)>,
}

impl Default for TF_Buffer {
    fn default() -> Self {
        TF_Buffer {
            data: std::ptr::null(),
            length: 0,
            data_deallocator: None,
        }
    }
}

unsafe extern "C" fn free_boxed_bytes(data: *mut c_void, length: usize) {
    if !data.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
            data as *mut u8,
            length,
        )));
    }
}

/// Replaces the contents of `buffer` with `bytes`, releasing the old data.
pub(crate) unsafe fn fill_buffer(buffer: *mut TF_Buffer, bytes: Vec<u8>) {
    let Some(buffer) = buffer.as_mut() else {
        return;
    };

    if let Some(dealloc) = buffer.data_deallocator.take() {
        dealloc(buffer.data as *mut c_void, buffer.length);
    }

    let bytes = bytes.into_boxed_slice();
    buffer.length = bytes.len();
    buffer.data = Box::into_raw(bytes) as *const u8 as *const c_void;
    buffer.data_deallocator = Some(free_boxed_bytes);
}

pub unsafe fn TF_NewBuffer() -> *mut TF_Buffer {
    Box::into_raw(Box::default())
}

pub unsafe fn TF_NewBufferFromString(proto: *const c_void, proto_len: usize) -> *mut TF_Buffer {
    let buffer = TF_NewBuffer();
    let bytes = if proto.is_null() || proto_len == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(proto as *const u8, proto_len).to_vec()
    };
    fill_buffer(buffer, bytes);
    buffer
}

pub unsafe fn TF_DeleteBuffer(buffer: *mut TF_Buffer) {
    if buffer.is_null() {
        return;
    }

    let buffer = Box::from_raw(buffer);
    if let Some(dealloc) = buffer.data_deallocator {
        dealloc(buffer.data as *mut c_void, buffer.length);
    }
}

/// Reads the bytes referenced by a possibly null buffer.
pub(crate) unsafe fn buffer_bytes<'a>(buffer: *const TF_Buffer) -> &'a [u8] {
    match buffer.as_ref() {
        Some(b) if !b.data.is_null() && b.length > 0 => {
            std::slice::from_raw_parts(b.data as *const u8, b.length)
        }
        _ => &[],
    }
}

/// Reads a NUL-terminated string argument.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str, Failure> {
    if ptr.is_null() {
        return Err(Failure::invalid_argument("unexpected null string"));
    }

    std::ffi::CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| Failure::invalid_argument(format!("string is not valid UTF-8: {}", e)))
}

/// Error carried inside the runtime until it is written to a status.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Failure {
    pub code: TF_Code,
    pub message: String,
}

impl Failure {
    pub fn new(code: TF_Code, message: impl Into<String>) -> Self {
        Failure {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(TF_INVALID_ARGUMENT, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TF_NOT_FOUND, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(TF_OUT_OF_RANGE, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(TF_FAILED_PRECONDITION, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(TF_UNIMPLEMENTED, message)
    }
}

/// Name of a dtype as spelled in graph text and error messages.
pub(crate) fn dtype_name(dtype: TF_DataType) -> &'static str {
    match dtype {
        TF_FLOAT => "float",
        TF_DOUBLE => "double",
        TF_INT32 => "int32",
        TF_UINT8 => "uint8",
        TF_INT16 => "int16",
        TF_INT8 => "int8",
        TF_STRING => "string",
        TF_INT64 => "int64",
        TF_BOOL => "bool",
        _ => "invalid",
    }
}

pub(crate) fn dtype_from_name(name: &str) -> Option<TF_DataType> {
    match name {
        "float" | "float32" => Some(TF_FLOAT),
        "double" | "float64" => Some(TF_DOUBLE),
        "int32" => Some(TF_INT32),
        "uint8" => Some(TF_UINT8),
        "int16" => Some(TF_INT16),
        "int8" => Some(TF_INT8),
        "string" => Some(TF_STRING),
        "int64" => Some(TF_INT64),
        "bool" => Some(TF_BOOL),
        _ => None,
    }
}

/// Element size of fixed-width dtypes.
pub(crate) fn dtype_size(dtype: TF_DataType) -> Option<usize> {
    match dtype {
        TF_FLOAT | TF_INT32 => Some(4),
        TF_DOUBLE | TF_INT64 => Some(8),
        TF_UINT8 | TF_INT8 | TF_BOOL => Some(1),
        TF_INT16 => Some(2),
        _ => None,
    }
}
