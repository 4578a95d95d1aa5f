// SPDX-License-Identifier: Apache-2.0

use crate::{ffi, DataType, Error, Handle, Result, TensorType};
use std::ffi::c_int;

define_component!(
    /// Wrapper for the `TF_Tensor` C object.
    #[derive(Debug)]
    pub Tensor,
    ffi::TF_Tensor,
    drop: TF_DeleteTensor
);

impl Tensor {
    /// Creates a new `Tensor` holding a copy of `data`.
    pub fn new<T: TensorType>(dims: &[i64], data: &[T]) -> Result<Self> {
        if let Some(d) = dims.iter().find(|d| **d < 0) {
            return Err(Error::InvalidArgument(format!(
                "Invalid dimension {} in {:?}",
                d, dims
            )));
        }

        let data_count = dims
            .iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("Element count of {:?} overflows", dims))
            })?;
        if data.len() != data_count {
            return Err(Error::InvalidArgument(format!(
                "Unexpected data length: expected {}, got {}",
                data_count,
                data.len()
            )));
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut tensor = unsafe {
            Self::from_ptr(ffi::TF_AllocateTensor(
                T::data_type().to_tf(),
                dims.as_ptr(),
                dims.len() as c_int,
                bytes.len(),
            ))?
        };

        if !bytes.is_empty() {
            let dst = unsafe { ffi::TF_TensorData(tensor.as_mut_ptr()) } as *mut u8;
            if dst.is_null() {
                return Err(Error::EmptyValue);
            }
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
        }

        Ok(tensor)
    }

    /// Creates a new rank-0 `Tensor`.
    pub fn scalar<T: TensorType>(value: T) -> Result<Self> {
        Self::new(&[], &[value])
    }

    /// Returns the dimensions of the `Tensor`.
    pub fn dims(&self) -> Vec<i64> {
        let n = unsafe { ffi::TF_NumDims(self.as_ptr()) };
        (0..n)
            .map(|i| unsafe { ffi::TF_Dim(self.as_ptr(), i) })
            .collect()
    }

    /// Returns the number of elements of the `Tensor`.
    pub fn num_elements(&self) -> usize {
        let dims = self.dims();
        if dims.iter().any(|d| *d <= 0) {
            return 0;
        }
        dims.iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(*d as usize))
            .unwrap_or(usize::MAX)
    }

    /// Returns the element type of the `Tensor`.
    pub fn data_type(&self) -> Result<DataType> {
        DataType::from_tf(unsafe { ffi::TF_TensorType(self.as_ptr()) })
    }

    /// Returns the size of the `Tensor` data in bytes.
    pub fn byte_size(&self) -> usize {
        unsafe { ffi::TF_TensorByteSize(self.as_ptr()) }
    }

    /// Returns the raw data of the `Tensor`.
    pub fn as_bytes(&self) -> &[u8] {
        let data = unsafe { ffi::TF_TensorData(self.as_ptr()) } as *const u8;
        let len = self.byte_size();
        if data.is_null() || len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(data, len) }
        }
    }

    /// Returns the data of the `Tensor` as a typed slice.
    pub fn as_slice<T: TensorType>(&self) -> Result<&[T]> {
        let data_type = self.data_type()?;
        if data_type != T::data_type() {
            return Err(Error::InvalidArgument(format!(
                "Tensor has type {:?}, cannot be read as {}",
                data_type,
                T::data_type().type_name()
            )));
        }

        bytemuck::try_cast_slice(self.as_bytes())
            .map_err(|e| Error::ConversionFailed(format!("Could not view tensor data [{}]", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_access() {
        let t = Tensor::new(&[2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.dims(), vec![2, 2]);
        assert_eq!(t.num_elements(), 4);
        assert_eq!(t.byte_size(), 16);
        assert_eq!(t.data_type().unwrap(), DataType::Float32);
        assert_eq!(t.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0, 4.0]);

        assert!(matches!(
            t.as_slice::<i32>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn scalar_has_no_dims() {
        let t = Tensor::scalar(5i64).unwrap();
        assert!(t.dims().is_empty());
        assert_eq!(t.as_slice::<i64>().unwrap(), &[5]);
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(Tensor::new(&[3], &[1u8, 2]).is_err());
        assert!(Tensor::new(&[-1], &[1i32]).is_err());
    }

    #[test]
    fn rejects_overflowing_dims() {
        assert!(matches!(
            Tensor::new(&[i64::MAX, 4], &[1.0f32]),
            Err(Error::InvalidArgument(_))
        ));
    }
}
