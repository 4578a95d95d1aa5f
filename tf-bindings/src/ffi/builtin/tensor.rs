// SPDX-License-Identifier: Apache-2.0

use super::*;
use std::ffi::{c_int, c_void};

/// A dense host tensor.
///
/// The payload lives in `u64` words so that every element type is suitably
/// aligned when the data pointer is reinterpreted by the caller.
#[derive(Debug)]
pub struct TF_Tensor {
    dtype: TF_DataType,
    dims: Vec<i64>,
    words: *mut [u64],
    len: usize,
}

impl TF_Tensor {
    fn alloc(dtype: TF_DataType, dims: Vec<i64>, len: usize) -> Self {
        let words = vec![0u64; len.div_ceil(8)].into_boxed_slice();
        TF_Tensor {
            dtype,
            dims,
            words: Box::into_raw(words),
            len,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: `words` is a live allocation of at least `len` bytes
        unsafe { std::slice::from_raw_parts(self.words as *const u8, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `self` is borrowed mutably
        unsafe { std::slice::from_raw_parts_mut(self.words as *mut u8, self.len) }
    }
}

impl Drop for TF_Tensor {
    fn drop(&mut self) {
        // SAFETY: `words` came from `Box::into_raw` in `alloc`
        unsafe { drop(Box::from_raw(self.words)) };
    }
}

pub unsafe fn TF_AllocateTensor(
    dtype: TF_DataType,
    dims: *const i64,
    num_dims: c_int,
    len: usize,
) -> *mut TF_Tensor {
    let dims = if dims.is_null() || num_dims <= 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(dims, num_dims as usize).to_vec()
    };
    Box::into_raw(Box::new(TF_Tensor::alloc(dtype, dims, len)))
}

pub unsafe fn TF_DeleteTensor(tensor: *mut TF_Tensor) {
    if !tensor.is_null() {
        drop(Box::from_raw(tensor));
    }
}

pub unsafe fn TF_TensorType(tensor: *const TF_Tensor) -> TF_DataType {
    (*tensor).dtype
}

pub unsafe fn TF_NumDims(tensor: *const TF_Tensor) -> c_int {
    let tensor = &*tensor;
    tensor.dims.len() as c_int
}

pub unsafe fn TF_Dim(tensor: *const TF_Tensor, dim_index: c_int) -> i64 {
    let tensor = &*tensor;
    tensor.dims.get(dim_index as usize).copied().unwrap_or(-1)
}

pub unsafe fn TF_TensorByteSize(tensor: *const TF_Tensor) -> usize {
    (*tensor).len
}

pub unsafe fn TF_TensorData(tensor: *const TF_Tensor) -> *mut c_void {
    (*tensor).words as *mut c_void
}

/// A tensor value flowing through the evaluator. Every element is held as
/// an `f64`; the mock has no string kernels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Value {
    pub dtype: TF_DataType,
    pub dims: Vec<i64>,
    pub data: Vec<f64>,
}

pub(crate) fn num_elements(dims: &[i64]) -> usize {
    dims.iter().map(|d| (*d).max(0) as usize).product()
}

impl Value {
    pub fn numeric(dtype: TF_DataType, dims: Vec<i64>, data: Vec<f64>) -> Self {
        Value { dtype, dims, data }
    }

    pub fn scalar(dtype: TF_DataType, v: f64) -> Self {
        Self::numeric(dtype, Vec::new(), vec![v])
    }

    /// Decodes a little-endian host buffer of the given dtype.
    pub fn from_bytes(dtype: TF_DataType, dims: Vec<i64>, bytes: &[u8]) -> Result<Self, Failure> {
        let size = dtype_size(dtype).ok_or_else(|| {
            Failure::unimplemented(format!("dtype {} has no fixed width", dtype_name(dtype)))
        })?;

        let expected = num_elements(&dims) * size;
        if bytes.len() != expected {
            return Err(Failure::invalid_argument(format!(
                "expected {} bytes for shape {:?}, got {}",
                expected,
                dims,
                bytes.len()
            )));
        }

        let data = bytes
            .chunks_exact(size)
            .map(|c| decode(dtype, c))
            .collect();
        Ok(Self::numeric(dtype, dims, data))
    }

    /// Encodes the elements as a host buffer of `self.dtype`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Failure> {
        let size = dtype_size(self.dtype).ok_or_else(|| {
            Failure::unimplemented(format!("dtype {} has no fixed width", dtype_name(self.dtype)))
        })?;

        let mut out = Vec::with_capacity(self.data.len() * size);
        for v in &self.data {
            encode(self.dtype, *v, &mut out);
        }
        Ok(out)
    }

    pub fn from_tensor(tensor: &TF_Tensor) -> Result<Self, Failure> {
        Self::from_bytes(tensor.dtype, tensor.dims.clone(), tensor.bytes())
    }

    pub fn into_tensor(self) -> Result<*mut TF_Tensor, Failure> {
        let bytes = self.to_bytes()?;
        let mut tensor = TF_Tensor::alloc(self.dtype, self.dims, bytes.len());
        tensor.bytes_mut().copy_from_slice(&bytes);
        Ok(Box::into_raw(Box::new(tensor)))
    }
}

fn decode(dtype: TF_DataType, c: &[u8]) -> f64 {
    match dtype {
        TF_FLOAT => f32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f64,
        TF_DOUBLE => f64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
        TF_INT32 => i32::from_ne_bytes([c[0], c[1], c[2], c[3]]) as f64,
        TF_INT64 => i64::from_ne_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f64,
        TF_INT16 => i16::from_ne_bytes([c[0], c[1]]) as f64,
        TF_INT8 => c[0] as i8 as f64,
        TF_UINT8 => c[0] as f64,
        TF_BOOL => (c[0] != 0) as u8 as f64,
        _ => 0.0,
    }
}

fn encode(dtype: TF_DataType, v: f64, out: &mut Vec<u8>) {
    match dtype {
        TF_FLOAT => out.extend_from_slice(&(v as f32).to_ne_bytes()),
        TF_DOUBLE => out.extend_from_slice(&v.to_ne_bytes()),
        TF_INT32 => out.extend_from_slice(&(v as i32).to_ne_bytes()),
        TF_INT64 => out.extend_from_slice(&(v as i64).to_ne_bytes()),
        TF_INT16 => out.extend_from_slice(&(v as i16).to_ne_bytes()),
        TF_INT8 => out.push(v as i8 as u8),
        TF_UINT8 => out.push(v as u8),
        TF_BOOL => out.push((v != 0.0) as u8),
        _ => {}
    }
}
