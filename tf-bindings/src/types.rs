// SPDX-License-Identifier: Apache-2.0

use crate::lite::ArrayData;
use crate::{ffi, Error, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Element types shared by graph tensors and TFLite tensors.
///
/// The discriminant is the TFLite type code.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum DataType {
    Float32 = ffi::kTfLiteFloat32,
    Int32 = ffi::kTfLiteInt32,
    UInt8 = ffi::kTfLiteUInt8,
    Int64 = ffi::kTfLiteInt64,
    String = ffi::kTfLiteString,
}

impl DataType {
    /// Returns the TFLite type code.
    pub fn c(&self) -> i32 {
        u32::from(*self) as i32
    }

    /// Looks up a TFLite type code.
    pub fn from_c(c: i32) -> Result<Self> {
        u32::try_from(c)
            .ok()
            .and_then(|c| DataType::try_from(c).ok())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "DataType error: DataType {} is not recognized in Rust (version {})",
                    c,
                    crate::lite::version()
                ))
            })
    }

    /// Returns the graph runtime type code.
    pub fn to_tf(&self) -> ffi::TF_DataType {
        match self {
            DataType::Float32 => ffi::TF_FLOAT,
            DataType::Int32 => ffi::TF_INT32,
            DataType::UInt8 => ffi::TF_UINT8,
            DataType::Int64 => ffi::TF_INT64,
            DataType::String => ffi::TF_STRING,
        }
    }

    /// Looks up a graph runtime type code.
    pub fn from_tf(code: ffi::TF_DataType) -> Result<Self> {
        match code {
            ffi::TF_FLOAT => Ok(DataType::Float32),
            ffi::TF_INT32 => Ok(DataType::Int32),
            ffi::TF_UINT8 => Ok(DataType::UInt8),
            ffi::TF_INT64 => Ok(DataType::Int64),
            ffi::TF_STRING => Ok(DataType::String),
            c => Err(Error::InvalidArgument(format!(
                "DataType error: DataType {} is not recognized in Rust (version {})",
                c,
                crate::version()
            ))),
        }
    }

    /// Returns the element size in bytes, or -1 for variable-length types.
    pub fn byte_size(&self) -> i32 {
        self.try_size_of().map_or(-1, |s| s as i32)
    }
}

/// Rust element types that can back a tensor.
pub trait TensorType: Default + Clone + bytemuck::Pod {
    /// DataType of the Tensor type
    fn data_type() -> DataType;

    #[doc(hidden)]
    fn into_array(data: Vec<Self>) -> ArrayData;

    #[doc(hidden)]
    fn from_array(data: &ArrayData) -> Option<&[Self]>;
}

impl_tensor_types! {
    DataType, ArrayData;
    f32 => Float32,
    i32 => Int32,
    u8 => UInt8,
    i64 => Int64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_codes() {
        assert_eq!(DataType::Float32.c(), 1);
        assert_eq!(DataType::String.c(), 5);
        assert_eq!(DataType::from_c(3).unwrap(), DataType::UInt8);
        assert_eq!(DataType::from_tf(ffi::TF_INT64).unwrap(), DataType::Int64);
        assert_eq!(DataType::Int32.to_tf(), ffi::TF_INT32);

        assert!(DataType::from_c(-1).is_err());
        assert!(DataType::from_tf(ffi::TF_DOUBLE).is_err());
    }

    #[test]
    fn element_sizes() {
        assert_eq!(DataType::UInt8.byte_size(), 1);
        assert_eq!(DataType::Int64.byte_size(), 8);
        assert_eq!(DataType::String.try_size_of(), None);
        assert_eq!(DataType::Float32.type_name(), "f32");
        assert_eq!(<i32 as TensorType>::data_type(), DataType::Int32);
    }
}
