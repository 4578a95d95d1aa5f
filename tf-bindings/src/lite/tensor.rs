// SPDX-License-Identifier: Apache-2.0

use super::buffer::decode_strings;
use crate::{ffi, string_from, DataType, Error, Result, TensorType};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A view of an interpreter input or output tensor.
///
/// Borrows the interpreter, so it cannot outlive it or observe a resize.
pub struct Tensor<'a> {
    ptr: NonNull<ffi::TfLiteTensor>,
    _interpreter: PhantomData<&'a ()>,
}

impl Tensor<'_> {
    pub(crate) unsafe fn new(ptr: *const ffi::TfLiteTensor) -> Option<Self> {
        NonNull::new(ptr as *mut ffi::TfLiteTensor).map(|ptr| Tensor {
            ptr,
            _interpreter: PhantomData,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut ffi::TfLiteTensor {
        self.ptr.as_ptr()
    }

    pub fn name(&self) -> String {
        unsafe { string_from(ffi::TfLiteTensorName(self.ptr.as_ptr())) }
    }

    pub fn data_type(&self) -> Result<DataType> {
        DataType::from_c(unsafe { ffi::TfLiteTensorType(self.ptr.as_ptr()) } as i32)
    }

    pub fn num_dims(&self) -> usize {
        unsafe { ffi::TfLiteTensorNumDims(self.ptr.as_ptr()) }.max(0) as usize
    }

    pub fn shape(&self) -> Vec<i32> {
        (0..self.num_dims() as i32)
            .map(|i| unsafe { ffi::TfLiteTensorDim(self.ptr.as_ptr(), i) })
            .collect()
    }

    pub fn num_elements(&self) -> usize {
        self.shape().iter().map(|d| (*d).max(0) as usize).product()
    }

    /// Returns the size of the tensor data in bytes.
    pub fn byte_size(&self) -> usize {
        unsafe { ffi::TfLiteTensorByteSize(self.ptr.as_ptr()) }
    }

    /// Returns the raw tensor data, empty until tensors are allocated.
    pub fn data(&self) -> &[u8] {
        let data = unsafe { ffi::TfLiteTensorData(self.ptr.as_ptr()) } as *const u8;
        if data.is_null() {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(data, self.byte_size()) }
        }
    }

    pub fn as_slice<T: TensorType>(&self) -> Result<&[T]> {
        let data_type = self.data_type()?;
        if data_type != T::data_type() {
            return Err(Error::InvalidArgument(format!(
                "Tensor {} has type {:?}, cannot be read as {}",
                self.name(),
                data_type,
                T::data_type().type_name()
            )));
        }

        bytemuck::try_cast_slice(self.data())
            .map_err(|e| Error::ConversionFailed(format!("Could not view tensor data [{}]", e)))
    }

    /// Decodes the elements of a string tensor.
    pub fn strings(&self) -> Result<Vec<Vec<u8>>> {
        match self.data_type()? {
            DataType::String => decode_strings(self.data()),
            other => Err(Error::InvalidArgument(format!(
                "Tensor {} has type {:?}, not String",
                self.name(),
                other
            ))),
        }
    }
}

impl fmt::Debug for Tensor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("name", &self.name())
            .field("data_type", &self.data_type().ok())
            .field("shape", &self.shape())
            .field("byte_size", &self.byte_size())
            .finish()
    }
}
