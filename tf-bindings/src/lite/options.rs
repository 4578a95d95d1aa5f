// SPDX-License-Identifier: Apache-2.0

use crate::{ffi, Error, Handle, Result};
use log::warn;
use std::ptr::NonNull;

/// A hardware delegate created by a delegate library.
///
/// The delegate is not owned: whoever created it deletes it, after every
/// interpreter using it is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegate {
    ptr: NonNull<ffi::TfLiteDelegate>,
}

unsafe impl Send for Delegate {}
unsafe impl Sync for Delegate {}

impl Delegate {
    /// Wraps a delegate created by native code.
    ///
    /// # Safety
    ///
    /// `ptr` must be a valid `TfLiteDelegate` that outlives every
    /// interpreter built with it.
    pub unsafe fn from_raw(ptr: *mut ffi::TfLiteDelegate) -> Result<Self> {
        NonNull::new(ptr)
            .map(|ptr| Delegate { ptr })
            .ok_or(Error::EmptyValue)
    }

    pub fn as_ptr(&self) -> *mut ffi::TfLiteDelegate {
        self.ptr.as_ptr()
    }
}

/// Interpreter settings. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    num_threads: i32,
    use_nnapi: bool,
    allow_fp16_precision_for_fp32: bool,
    delegates: Vec<Delegate>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            num_threads: -1,
            use_nnapi: false,
            allow_fp16_precision_for_fp32: false,
            delegates: Vec::new(),
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Number of threads, -1 letting the runtime decide.
    pub fn num_threads(&self) -> i32 {
        self.num_threads
    }

    pub fn use_nnapi(&self) -> bool {
        self.use_nnapi
    }

    pub fn allow_fp16_precision_for_fp32(&self) -> bool {
        self.allow_fp16_precision_for_fp32
    }

    pub fn delegates(&self) -> &[Delegate] {
        &self.delegates
    }

    /// Returns a builder starting from these options.
    pub fn to_builder(&self) -> OptionsBuilder {
        OptionsBuilder {
            options: self.clone(),
        }
    }

    /// Creates the native options, routing runtime diagnostics to `reporter`.
    ///
    /// `reporter` must outlive every interpreter built from the result.
    pub(crate) fn to_native(&self, reporter: &ffi::ErrorReporter) -> Result<InterpreterOptions> {
        let mut native = InterpreterOptions::new()?;
        let ptr = native.as_mut_ptr();
        unsafe {
            ffi::set_error_reporter(ptr, reporter);
            ffi::TfLiteInterpreterOptionsSetNumThreads(ptr, self.num_threads);
            ffi::TfLiteInterpreterOptionsSetUseNNAPI(ptr, self.use_nnapi);
            for delegate in &self.delegates {
                ffi::TfLiteInterpreterOptionsAddDelegate(ptr, delegate.as_ptr());
            }

            if self.allow_fp16_precision_for_fp32
                && !ffi::set_allow_fp16_precision_for_fp32(ptr, true)
            {
                warn!("fp16 precision for fp32 is not supported by this runtime; ignoring");
            }
        }
        Ok(native)
    }
}

/// Builds [`Options`].
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    pub fn num_threads(mut self, num_threads: i32) -> Self {
        self.options.num_threads = num_threads;
        self
    }

    /// Delegates to the Android Neural Networks API where available.
    pub fn use_nnapi(mut self, use_nnapi: bool) -> Self {
        self.options.use_nnapi = use_nnapi;
        self
    }

    /// Lets float32 operations run at float16 precision.
    pub fn allow_fp16_precision_for_fp32(mut self, allow: bool) -> Self {
        self.options.allow_fp16_precision_for_fp32 = allow;
        self
    }

    pub fn add_delegate(mut self, delegate: Delegate) -> Self {
        self.options.delegates.push(delegate);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

define_component!(
    /// Wrapper for the `TfLiteInterpreterOptions` C object.
    #[derive(Debug)]
    pub(crate) InterpreterOptions,
    ffi::TfLiteInterpreterOptions,
    drop: TfLiteInterpreterOptionsDelete
);

impl InterpreterOptions {
    fn new() -> Result<Self> {
        unsafe { Self::from_ptr(ffi::TfLiteInterpreterOptionsCreate()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let defaults = Options::default();
        assert_eq!(defaults.num_threads(), -1);
        assert!(!defaults.use_nnapi());

        let mut delegate = ffi::TfLiteDelegate::default();
        let delegate = unsafe { Delegate::from_raw(&mut delegate) }.unwrap();

        let options = Options::builder()
            .num_threads(4)
            .allow_fp16_precision_for_fp32(true)
            .add_delegate(delegate.clone())
            .build();
        assert_eq!(options.num_threads(), 4);
        assert!(options.allow_fp16_precision_for_fp32());
        assert_eq!(options.delegates(), &[delegate]);

        let changed = options.to_builder().use_nnapi(true).build();
        assert!(changed.use_nnapi());
        assert_eq!(changed.num_threads(), 4);

        assert!(options.to_native(&ffi::ErrorReporter::default()).is_ok());
    }

    #[test]
    fn null_delegate() {
        assert!(unsafe { Delegate::from_raw(std::ptr::null_mut()) }.is_err());
    }
}
