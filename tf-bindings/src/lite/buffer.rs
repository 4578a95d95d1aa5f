// SPDX-License-Identifier: Apache-2.0

use crate::{DataType, Error, Result, TensorType};
use derive_more::From;

/// The elements of an [`NdArray`], typed.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    UInt8(Vec<u8>),
    Int64(Vec<i64>),
    String(Vec<Vec<u8>>),
}

impl ArrayData {
    pub fn data_type(&self) -> DataType {
        match self {
            ArrayData::Float32(_) => DataType::Float32,
            ArrayData::Int32(_) => DataType::Int32,
            ArrayData::UInt8(_) => DataType::UInt8,
            ArrayData::Int64(_) => DataType::Int64,
            ArrayData::String(_) => DataType::String,
        }
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Float32(v) => v.len(),
            ArrayData::Int32(v) => v.len(),
            ArrayData::UInt8(v) => v.len(),
            ArrayData::Int64(v) => v.len(),
            ArrayData::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the elements the way a TFLite tensor stores them.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        match self {
            ArrayData::Float32(v) => bytemuck::cast_slice(v).to_vec(),
            ArrayData::Int32(v) => bytemuck::cast_slice(v).to_vec(),
            ArrayData::UInt8(v) => v.clone(),
            ArrayData::Int64(v) => bytemuck::cast_slice(v).to_vec(),
            ArrayData::String(v) => encode_strings(v),
        }
    }

    pub(crate) fn from_bytes(data_type: DataType, bytes: &[u8]) -> Result<Self> {
        Ok(match data_type {
            DataType::Float32 => ArrayData::Float32(pod_vec(bytes)?),
            DataType::Int32 => ArrayData::Int32(pod_vec(bytes)?),
            DataType::UInt8 => ArrayData::UInt8(bytes.to_vec()),
            DataType::Int64 => ArrayData::Int64(pod_vec(bytes)?),
            DataType::String => ArrayData::String(decode_strings(bytes)?),
        })
    }
}

fn pod_vec<T: TensorType>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(Error::ConversionFailed(format!(
            "{} bytes do not hold a whole number of {} elements",
            bytes.len(),
            T::data_type().type_name()
        )));
    }

    let mut data = vec![T::default(); bytes.len() / size];
    bytemuck::cast_slice_mut::<T, u8>(&mut data).copy_from_slice(bytes);
    Ok(data)
}

/// Packs strings as an `i32` count, `count + 1` `i32` offsets from the
/// start of the buffer, then the string bytes.
pub(crate) fn encode_strings(strings: &[Vec<u8>]) -> Vec<u8> {
    let header = 4 * (strings.len() + 2);
    let total = header + strings.iter().map(Vec::len).sum::<usize>();

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(strings.len() as i32).to_ne_bytes());
    let mut offset = header;
    for s in strings {
        out.extend_from_slice(&(offset as i32).to_ne_bytes());
        offset += s.len();
    }
    out.extend_from_slice(&(offset as i32).to_ne_bytes());
    for s in strings {
        out.extend_from_slice(s);
    }
    out
}

pub(crate) fn decode_strings(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let malformed = || Error::ConversionFailed("Malformed string tensor buffer".to_string());
    let word = |i: usize| -> Result<usize> {
        let b = bytes.get(4 * i..4 * i + 4).ok_or_else(malformed)?;
        usize::try_from(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])).map_err(|_| malformed())
    };

    let count = word(0)?;
    (0..count)
        .map(|i| {
            let (start, end) = (word(i + 1)?, word(i + 2)?);
            bytes.get(start..end).map(<[u8]>::to_vec).ok_or_else(malformed)
        })
        .collect()
}

/// A dense n-dimensional array exchanged with an interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    dims: Vec<i32>,
    data: ArrayData,
}

impl NdArray {
    /// Creates an array of shape `dims` holding `data` in row-major order.
    pub fn new<T: TensorType>(dims: &[i32], data: Vec<T>) -> Result<Self> {
        Self::from_data(dims, T::into_array(data))
    }

    /// Creates an array of byte strings.
    pub fn from_strings(dims: &[i32], strings: Vec<Vec<u8>>) -> Result<Self> {
        Self::from_data(dims, ArrayData::String(strings))
    }

    pub fn from_data(dims: &[i32], data: ArrayData) -> Result<Self> {
        let count = dims.iter().try_fold(1usize, |n, d| {
            usize::try_from(*d).ok().and_then(|d| n.checked_mul(d))
        });
        match count {
            Some(c) if c == data.len() => Ok(NdArray {
                dims: dims.to_vec(),
                data,
            }),
            Some(c) => Err(Error::InvalidArgument(format!(
                "Unexpected data length: expected {}, got {}",
                c,
                data.len()
            ))),
            None => Err(Error::InvalidArgument(format!(
                "Invalid array shape {:?}",
                dims
            ))),
        }
    }

    /// Creates an empty array of `data_type`, to be filled as an output.
    pub fn empty(data_type: DataType) -> Self {
        let data = match data_type {
            DataType::Float32 => ArrayData::Float32(Vec::new()),
            DataType::Int32 => ArrayData::Int32(Vec::new()),
            DataType::UInt8 => ArrayData::UInt8(Vec::new()),
            DataType::Int64 => ArrayData::Int64(Vec::new()),
            DataType::String => ArrayData::String(Vec::new()),
        };
        NdArray {
            dims: vec![0],
            data,
        }
    }

    pub fn dims(&self) -> &[i32] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// Returns the elements if they are of type `T`.
    pub fn as_slice<T: TensorType>(&self) -> Option<&[T]> {
        T::from_array(&self.data)
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }
}

/// Data fed to an interpreter input.
///
/// Arrays resize the input to their shape. Raw bytes must match the current
/// byte size of the input and cannot feed string inputs.
#[derive(Debug, From)]
pub enum InputBuffer<'a> {
    Array(&'a NdArray),
    Bytes(&'a [u8]),
}

/// Destination of an interpreter output.
///
/// Arrays are reshaped and refilled; raw bytes must match the output size.
#[derive(Debug, From)]
pub enum OutputBuffer<'a> {
    Array(&'a mut NdArray),
    Bytes(&'a mut [u8]),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_must_fit() {
        let a = NdArray::new(&[2, 3], vec![0i64; 6]).unwrap();
        assert_eq!(a.dims(), &[2, 3]);
        assert_eq!(a.data_type(), DataType::Int64);
        assert_eq!(a.as_slice::<i64>(), Some(&[0i64; 6][..]));
        assert_eq!(a.as_slice::<f32>(), None);

        assert!(NdArray::new(&[2, 2], vec![1.0f32; 3]).is_err());
        assert!(NdArray::new(&[-1], vec![1u8]).is_err());
        assert!(NdArray::from_strings(&[], vec![b"one".to_vec()]).is_ok());
    }

    #[test]
    fn string_encoding() {
        let strings = vec![b"hello".to_vec(), Vec::new(), b"tf".to_vec()];
        let bytes = encode_strings(&strings);
        assert_eq!(bytes.len(), 4 * 5 + 7);
        assert_eq!(decode_strings(&bytes).unwrap(), strings);
        assert!(decode_strings(&bytes[..10]).is_err());
    }

    #[test]
    fn bytes_to_data() {
        let data = ArrayData::from_bytes(DataType::Int32, &[1, 0, 0, 0, 2, 0, 0, 0]).unwrap();
        if cfg!(target_endian = "little") {
            assert_eq!(data, ArrayData::Int32(vec![1, 2]));
        }
        assert!(ArrayData::from_bytes(DataType::Float32, &[0; 6]).is_err());
        assert_eq!(data.to_bytes().len(), 8);
    }
}
