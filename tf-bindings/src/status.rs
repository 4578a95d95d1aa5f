// SPDX-License-Identifier: Apache-2.0

use crate::error::Code;
use crate::{ffi, Error, Handle, Result};
use std::ffi::CStr;

define_component!(
    /// Wrapper for the `TF_Status` C object.
    #[derive(Debug)]
    pub Status,
    ffi::TF_Status,
    drop: TF_DeleteStatus
);

impl Status {
    /// Creates a new `Status` set to OK.
    pub fn new() -> Result<Self> {
        unsafe { Self::from_ptr(ffi::TF_NewStatus()) }
    }

    /// Returns the code of the `Status`.
    pub fn code(&self) -> Code {
        Code::from(unsafe { ffi::TF_GetCode(self.as_ptr()) } as u32)
    }

    /// Returns the message of the `Status`.
    pub fn message(&self) -> String {
        let msg = unsafe { ffi::TF_Message(self.as_ptr()) };
        if msg.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }

    /// Returns `true` if the `Status` is OK.
    pub fn is_ok(&self) -> bool {
        self.code() == Code::Ok
    }

    /// Turns a failed `Status` into the matching error.
    pub fn check(&self) -> Result<()> {
        match self.code() {
            Code::Ok => Ok(()),
            code => Err(Error::from_status(code, self.message())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn check_maps_codes() {
        let mut status = Status::new().unwrap();
        assert!(status.is_ok());
        assert!(status.check().is_ok());

        let msg = CString::new("no such tensor").unwrap();
        unsafe { ffi::TF_SetStatus(status.as_mut_ptr(), ffi::TF_NOT_FOUND, msg.as_ptr()) };
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such tensor");

        let err = status.check().unwrap_err();
        assert_eq!(err.code(), Some(Code::NotFound));
    }
}
