// SPDX-License-Identifier: Apache-2.0

//! The native boundary.
//!
//! Every call into the TensorFlow and TensorFlow Lite C APIs made by this
//! crate goes through this module. The entry points are generated by bindgen
//! and linked against the system libraries. The test suite enables the
//! `builtin-runtime` feature instead, which swaps in an in-process mock of the
//! same C-shaped subset.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

use log::debug;
use std::ffi::{c_char, c_void, CStr};
use std::sync::{Mutex, PoisonError};

#[cfg(not(feature = "builtin-runtime"))]
mod native;
#[cfg(not(feature = "builtin-runtime"))]
pub use native::*;

#[cfg(feature = "builtin-runtime")]
mod builtin;
#[cfg(feature = "builtin-runtime")]
pub use builtin::*;

/// Collects the diagnostics the TFLite runtime reports for one interpreter.
///
/// The runtime keeps a raw pointer to it, so it must outlive the
/// interpreter it is installed on.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    messages: Mutex<Vec<String>>,
}

impl ErrorReporter {
    fn push(&self, message: &CStr) {
        let message = message.to_string_lossy();
        debug!("TfLite: {}", message.trim_end());
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.trim_end().to_owned());
    }

    /// Drains the messages reported so far, one per line.
    pub fn take(&self) -> Option<String> {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        if messages.is_empty() {
            return None;
        }

        let joined = messages.join("\n");
        messages.clear();
        Some(joined)
    }
}

#[cfg(not(feature = "builtin-runtime"))]
unsafe extern "C" fn forward_report(
    user_data: *mut c_void,
    format: *const c_char,
    args: native::VaList,
) {
    let mut message = [0 as c_char; 1024];
    if vsnprintf(message.as_mut_ptr(), message.len() as _, format, args) < 0 {
        return;
    }

    if let Some(reporter) = (user_data as *const ErrorReporter).as_ref() {
        reporter.push(CStr::from_ptr(message.as_ptr()));
    }
}

#[cfg(feature = "builtin-runtime")]
unsafe extern "C" fn forward_report(user_data: *mut c_void, message: *const c_char) {
    if let Some(reporter) = (user_data as *const ErrorReporter).as_ref() {
        reporter.push(CStr::from_ptr(message));
    }
}

/// Routes the runtime's error messages for interpreters built from
/// `options` into `reporter`.
///
/// # Safety
///
/// `options` must be a live pointer returned by
/// `TfLiteInterpreterOptionsCreate`, and `reporter` must outlive every
/// interpreter created from it.
pub unsafe fn set_error_reporter(
    options: *mut TfLiteInterpreterOptions,
    reporter: *const ErrorReporter,
) {
    TfLiteInterpreterOptionsSetErrorReporter(
        options,
        Some(forward_report),
        reporter as *mut c_void,
    );
}

/// Forwards the fp16 relaxation flag to the interpreter options.
///
/// The stable TFLite C API has no setter for it, so with the native runtime
/// the flag cannot be honoured. Returns `false` in that case.
///
/// # Safety
///
/// `options` must be a live pointer returned by
/// `TfLiteInterpreterOptionsCreate`.
pub unsafe fn set_allow_fp16_precision_for_fp32(
    options: *mut TfLiteInterpreterOptions,
    allow: bool,
) -> bool {
    #[cfg(not(feature = "builtin-runtime"))]
    {
        let _ = (options, allow);
        false
    }

    #[cfg(feature = "builtin-runtime")]
    {
        TfLiteInterpreterOptionsSetAllowFp16PrecisionForFp32(options, allow);
        true
    }
}
