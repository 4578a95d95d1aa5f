// SPDX-License-Identifier: Apache-2.0

use super::{Failure, TF_Code, TF_OK};
use std::ffi::{c_char, CString};

#[derive(Debug)]
pub struct TF_Status {
    code: TF_Code,
    message: CString,
}

impl TF_Status {
    pub(crate) fn set(&mut self, failure: &Failure) {
        self.code = failure.code;
        self.message = to_cstring(&failure.message);
    }

    pub(crate) fn clear(&mut self) {
        self.code = TF_OK;
        self.message = CString::default();
    }
}

fn to_cstring(message: &str) -> CString {
    CString::new(message.replace('\0', " ")).unwrap_or_default()
}

/// Writes the outcome of `f` into `status`, returning its value on success.
pub(crate) unsafe fn report<T>(
    status: *mut TF_Status,
    f: impl FnOnce() -> Result<T, Failure>,
) -> Option<T> {
    let result = f();
    if let Some(status) = status.as_mut() {
        match &result {
            Ok(_) => status.clear(),
            Err(failure) => status.set(failure),
        }
    }
    result.ok()
}

static EMPTY: &[u8] = b"\0";

pub unsafe fn TF_NewStatus() -> *mut TF_Status {
    Box::into_raw(Box::new(TF_Status {
        code: TF_OK,
        message: CString::default(),
    }))
}

pub unsafe fn TF_DeleteStatus(status: *mut TF_Status) {
    if !status.is_null() {
        drop(Box::from_raw(status));
    }
}

pub unsafe fn TF_SetStatus(status: *mut TF_Status, code: TF_Code, msg: *const c_char) {
    let Some(status) = status.as_mut() else {
        return;
    };

    status.code = code;
    status.message = if code == TF_OK || msg.is_null() {
        CString::default()
    } else {
        std::ffi::CStr::from_ptr(msg).to_owned()
    };
}

pub unsafe fn TF_GetCode(status: *const TF_Status) -> TF_Code {
    status.as_ref().map_or(TF_OK, |s| s.code)
}

pub unsafe fn TF_Message(status: *const TF_Status) -> *const c_char {
    match status.as_ref() {
        Some(s) => s.message.as_ptr(),
        None => EMPTY.as_ptr() as *const c_char,
    }
}
