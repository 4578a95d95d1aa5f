// SPDX-License-Identifier: Apache-2.0

use crate::ffi;
use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error as ThisError;

/// Status codes reported by the TensorFlow runtime.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Code {
    Ok = ffi::TF_OK,
    Cancelled = ffi::TF_CANCELLED,
    Unknown = ffi::TF_UNKNOWN,
    InvalidArgument = ffi::TF_INVALID_ARGUMENT,
    DeadlineExceeded = ffi::TF_DEADLINE_EXCEEDED,
    NotFound = ffi::TF_NOT_FOUND,
    AlreadyExists = ffi::TF_ALREADY_EXISTS,
    PermissionDenied = ffi::TF_PERMISSION_DENIED,
    ResourceExhausted = ffi::TF_RESOURCE_EXHAUSTED,
    FailedPrecondition = ffi::TF_FAILED_PRECONDITION,
    Aborted = ffi::TF_ABORTED,
    OutOfRange = ffi::TF_OUT_OF_RANGE,
    Unimplemented = ffi::TF_UNIMPLEMENTED,
    Internal = ffi::TF_INTERNAL,
    Unavailable = ffi::TF_UNAVAILABLE,
    DataLoss = ffi::TF_DATA_LOSS,
    Unauthenticated = ffi::TF_UNAUTHENTICATED,
    #[num_enum(catch_all)]
    Unrecognized(u32),
}

/// The core error variants.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Graph has been closed")]
    GraphClosed,

    #[error("Session has been closed")]
    SessionClosed,

    #[error("Internal error: The Interpreter has already been closed.")]
    InterpreterClosed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Native runtime error: {message} ({code:?})")]
    Native { code: Code, message: String },

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Empty value")]
    EmptyValue,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds the error for a failed native status.
    pub fn from_status(code: Code, message: String) -> Self {
        match code {
            Code::InvalidArgument => Error::InvalidArgument(message),
            code => Error::Native { code, message },
        }
    }

    /// Returns `true` for the illegal-state errors raised after a close.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Error::GraphClosed | Error::SessionClosed | Error::InterpreterClosed
        )
    }

    /// Returns the native status code, if the error came from the runtime.
    pub fn code(&self) -> Option<Code> {
        match self {
            Error::InvalidArgument(_) => Some(Code::InvalidArgument),
            Error::Native { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let err = Error::from_status(Code::InvalidArgument, "bad dims".to_string());
        assert!(matches!(err, Error::InvalidArgument(ref m) if m == "bad dims"));

        let err = Error::from_status(Code::NotFound, "no such op".to_string());
        assert_eq!(err.code(), Some(Code::NotFound));
        assert!(err.to_string().contains("no such op"));
        assert!(!err.is_closed());

        assert!(Error::GraphClosed.is_closed());
        assert_eq!(Code::from(42u32), Code::Unrecognized(42));
    }
}
