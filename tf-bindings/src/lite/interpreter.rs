// SPDX-License-Identifier: Apache-2.0

use super::buffer::{ArrayData, InputBuffer, NdArray, OutputBuffer};
use super::{Model, Options, Tensor};
use crate::error::Code;
use crate::{ffi, DataType, Error, Handle, Result};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::ptr::NonNull;
use std::time::Instant;

/// A live native interpreter and the model it was built from.
struct Inner {
    ptr: NonNull<ffi::TfLiteInterpreter>,
    model: Model,
    /// Installed on the native interpreter, which keeps a raw pointer to it.
    reporter: Box<ffi::ErrorReporter>,
}

impl Inner {
    fn create(model: Model, options: &Options) -> Result<Self> {
        let reporter = Box::<ffi::ErrorReporter>::default();
        let native = options.to_native(&reporter)?;
        let ptr = unsafe { ffi::TfLiteInterpreterCreate(model.as_ptr(), native.as_ptr()) };
        // The interpreter keeps its own copy of the options.
        drop(native);

        let ptr = NonNull::new(ptr).ok_or_else(|| Error::Native {
            code: Code::Internal,
            message: reporter
                .take()
                .unwrap_or_else(|| "Cannot create interpreter".to_string()),
        })?;
        debug!("Created interpreter {:p}", ptr);
        Ok(Inner {
            ptr,
            model,
            reporter,
        })
    }

    /// Runs `call` on the native interpreter, returning what the runtime
    /// reported if it fails.
    fn call(
        &self,
        call: impl FnOnce(*mut ffi::TfLiteInterpreter) -> ffi::TfLiteStatus,
    ) -> std::result::Result<(), Option<String>> {
        // Drop anything left over from calls that did not fail.
        self.reporter.take();
        if call(self.ptr.as_ptr()) == ffi::kTfLiteOk {
            Ok(())
        } else {
            Err(self.reporter.take())
        }
    }

    fn resize(&self, index: usize, dims: &[i32]) -> Result<()> {
        let len = i32::try_from(dims.len())
            .map_err(|_| Error::InvalidArgument(format!("Too many dimensions: {:?}", dims)))?;
        self.call(|ptr| unsafe {
            ffi::TfLiteInterpreterResizeInputTensor(ptr, index as i32, dims.as_ptr(), len)
        })
        .map_err(|reported| {
            Error::InvalidArgument(reported.unwrap_or_else(|| {
                format!("Failed to resize input {} to {:?}", index, dims)
            }))
        })
    }

    /// Deletes the native interpreter, handing back the model.
    fn delete(self) -> Model {
        unsafe { ffi::TfLiteInterpreterDelete(self.ptr.as_ptr()) };
        debug!("Deleted interpreter {:p}", self.ptr);
        self.model
    }
}

fn native_error(reported: Option<String>, fallback: &str) -> Error {
    Error::Native {
        code: Code::Internal,
        message: reported.unwrap_or_else(|| fallback.to_string()),
    }
}

/// Runs inference on a TensorFlow Lite model.
///
/// An interpreter may be moved between threads but not shared: every call
/// that changes its state takes `&mut self`.
pub struct Interpreter {
    inner: Option<Inner>,
    options: Options,
    /// Input shapes set through resizes, re-applied when rebuilding.
    resized: BTreeMap<usize, Vec<i32>>,
    allocated: bool,
    last_inference_ns: Option<i64>,
}

// The native interpreter is only reachable through this owner.
unsafe impl Send for Interpreter {}

impl Interpreter {
    /// Creates an interpreter for the model file at `path`.
    pub fn from_file(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::from_model(Model::from_file(path)?, options)
    }

    /// Creates an interpreter for a model held in memory.
    pub fn from_bytes(bytes: Vec<u8>, options: Options) -> Result<Self> {
        Self::from_model(Model::from_bytes(bytes)?, options)
    }

    /// Creates an interpreter for a memory-mapped model file.
    pub fn from_mapped_file(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        Self::from_model(Model::from_mapped_file(path)?, options)
    }

    pub fn from_model(model: Model, options: Options) -> Result<Self> {
        let mut interpreter = Interpreter {
            inner: Some(Inner::create(model, &options)?),
            options,
            resized: BTreeMap::new(),
            allocated: false,
            last_inference_ns: None,
        };
        interpreter.allocate()?;
        Ok(interpreter)
    }

    fn inner(&self) -> Result<&Inner> {
        self.inner.as_ref().ok_or(Error::InterpreterClosed)
    }

    fn native(&self) -> Result<*mut ffi::TfLiteInterpreter> {
        Ok(self.inner()?.ptr.as_ptr())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    fn allocate(&mut self) -> Result<()> {
        self.inner()?
            .call(|ptr| unsafe { ffi::TfLiteInterpreterAllocateTensors(ptr) })
            .map_err(|reported| {
                native_error(reported, "Unexpected failure when preparing tensor allocations.")
            })?;
        self.allocated = true;
        Ok(())
    }

    /// Runs a model with one input and one output.
    pub fn run<'i, 'o>(
        &mut self,
        input: impl Into<InputBuffer<'i>>,
        output: impl Into<OutputBuffer<'o>>,
    ) -> Result<()> {
        let input: InputBuffer<'i> = input.into();
        let mut outputs = HashMap::from([(0, output.into())]);
        self.run_for_multiple_inputs_outputs(&[input], &mut outputs)
    }

    /// Runs a model, feeding `inputs` in order and filling the outputs at
    /// the indices keyed in `outputs`.
    pub fn run_for_multiple_inputs_outputs(
        &mut self,
        inputs: &[InputBuffer<'_>],
        outputs: &mut HashMap<usize, OutputBuffer<'_>>,
    ) -> Result<()> {
        self.inner()?;
        if inputs.is_empty() {
            return Err(Error::InvalidArgument(
                "Input error: Inputs should not be null or empty.".to_string(),
            ));
        }
        if outputs.is_empty() {
            return Err(Error::InvalidArgument(
                "Input error: Outputs should not be null or empty.".to_string(),
            ));
        }

        for (i, input) in inputs.iter().enumerate() {
            match input {
                InputBuffer::Array(array) => self.resize_input(i, array.dims())?,
                InputBuffer::Bytes(_) => {
                    self.input_tensor(i)?;
                }
            }
        }
        if !self.allocated {
            self.allocate()?;
        }

        for (i, input) in inputs.iter().enumerate() {
            self.copy_input(i, input)?;
        }

        let inner = self.inner()?;
        let start = Instant::now();
        inner
            .call(|ptr| unsafe { ffi::TfLiteInterpreterInvoke(ptr) })
            .map_err(|reported| native_error(reported, "Failed to run on the given Interpreter"))?;
        self.last_inference_ns = Some(start.elapsed().as_nanos() as i64);

        for (index, output) in outputs.iter_mut() {
            self.copy_output(*index, output)?;
        }
        Ok(())
    }

    fn copy_input(&self, index: usize, input: &InputBuffer<'_>) -> Result<()> {
        let tensor = self.input_tensor(index)?;
        let data_type = tensor.data_type()?;

        let bytes = match input {
            InputBuffer::Array(array) => {
                if array.data_type() != data_type {
                    return Err(Error::InvalidArgument(format!(
                        "DataType error: cannot copy {:?} data into input {} ({}) of type {:?}",
                        array.data_type(),
                        index,
                        tensor.name(),
                        data_type
                    )));
                }
                let bytes = array.data().to_bytes();
                // TfLiteTensorCopyFromBuffer only fills existing storage, and
                // string tensors have none until a kernel writes them.
                if data_type == DataType::String && bytes.len() != tensor.byte_size() {
                    return Err(Error::InvalidArgument(format!(
                        "Cannot feed strings to input {} ({}): the TensorFlowLite C API cannot allocate string tensors ({} bytes needed, {} available)",
                        index,
                        tensor.name(),
                        bytes.len(),
                        tensor.byte_size()
                    )));
                }
                bytes
            }
            InputBuffer::Bytes(bytes) => {
                if data_type == DataType::String {
                    return Err(Error::InvalidArgument(format!(
                        "String input {} ({}) must be fed as an array",
                        index,
                        tensor.name()
                    )));
                }
                if bytes.len() != tensor.byte_size() {
                    return Err(Error::InvalidArgument(format!(
                        "Cannot copy to a TensorFlowLite tensor ({}) with {} bytes from a buffer with {} bytes.",
                        tensor.name(),
                        tensor.byte_size(),
                        bytes.len()
                    )));
                }
                bytes.to_vec()
            }
        };

        let status = unsafe {
            ffi::TfLiteTensorCopyFromBuffer(tensor.as_ptr(), bytes.as_ptr() as *const _, bytes.len())
        };
        if status != ffi::kTfLiteOk {
            return Err(Error::InvalidArgument(format!(
                "Failed to copy data into input {} ({})",
                index,
                tensor.name()
            )));
        }
        Ok(())
    }

    fn copy_output(&self, index: usize, output: &mut OutputBuffer<'_>) -> Result<()> {
        let tensor = self.output_tensor(index)?;
        let size = tensor.byte_size();

        let read = |dst: &mut [u8]| {
            let status = unsafe {
                ffi::TfLiteTensorCopyToBuffer(tensor.as_ptr(), dst.as_mut_ptr() as *mut _, dst.len())
            };
            if status == ffi::kTfLiteOk {
                Ok(())
            } else {
                Err(Error::InvalidArgument(format!(
                    "Failed to copy data from output {} ({})",
                    index,
                    tensor.name()
                )))
            }
        };

        match output {
            OutputBuffer::Array(array) => {
                let mut bytes = vec![0u8; size];
                read(&mut bytes[..])?;
                let data = ArrayData::from_bytes(tensor.data_type()?, &bytes)?;
                **array = NdArray::from_data(&tensor.shape(), data)?;
            }
            OutputBuffer::Bytes(bytes) => {
                if bytes.len() != size {
                    return Err(Error::InvalidArgument(format!(
                        "Cannot copy from a TensorFlowLite tensor ({}) with {} bytes to a buffer with {} bytes.",
                        tensor.name(),
                        size,
                        bytes.len()
                    )));
                }
                read(&mut bytes[..])?;
            }
        }
        Ok(())
    }

    /// Changes the shape of input `index`.
    ///
    /// Tensors are reallocated before the next run.
    pub fn resize_input(&mut self, index: usize, dims: &[i32]) -> Result<()> {
        if self.input_tensor(index)?.shape() == dims {
            return Ok(());
        }
        self.inner()?.resize(index, dims)?;

        self.resized.insert(index, dims.to_vec());
        self.allocated = false;
        Ok(())
    }

    pub fn input_tensor_count(&self) -> Result<usize> {
        let ptr = self.native()?;
        Ok(unsafe { ffi::TfLiteInterpreterGetInputTensorCount(ptr) }.max(0) as usize)
    }

    pub fn output_tensor_count(&self) -> Result<usize> {
        let ptr = self.native()?;
        Ok(unsafe { ffi::TfLiteInterpreterGetOutputTensorCount(ptr) }.max(0) as usize)
    }

    pub fn input_tensor(&self, index: usize) -> Result<Tensor<'_>> {
        let ptr = self.native()?;
        i32::try_from(index)
            .ok()
            .and_then(|i| unsafe { Tensor::new(ffi::TfLiteInterpreterGetInputTensor(ptr, i)) })
            .ok_or_else(|| Error::InvalidArgument(format!("Invalid input Tensor index: {}", index)))
    }

    pub fn output_tensor(&self, index: usize) -> Result<Tensor<'_>> {
        let ptr = self.native()?;
        i32::try_from(index)
            .ok()
            .and_then(|i| unsafe { Tensor::new(ffi::TfLiteInterpreterGetOutputTensor(ptr, i)) })
            .ok_or_else(|| Error::InvalidArgument(format!("Invalid output Tensor index: {}", index)))
    }

    fn names(tensors: impl Iterator<Item = (usize, String)>) -> String {
        let entries: Vec<String> = tensors.map(|(i, n)| format!("{}={}", n, i)).collect();
        format!("{{{}}}", entries.join(", "))
    }

    /// Returns the index of the input named `name`.
    pub fn input_index(&self, name: &str) -> Result<usize> {
        let names = (0..self.input_tensor_count()?)
            .map(|i| Ok((i, self.input_tensor(i)?.name())))
            .collect::<Result<Vec<_>>>()?;

        names
            .iter()
            .find(|(_, n)| n == name)
            .map(|(i, _)| *i)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Input error: '{}' is not a valid name for any input. Names of inputs and their indexes are {}",
                    name,
                    Self::names(names.into_iter())
                ))
            })
    }

    /// Returns the index of the output named `name`.
    pub fn output_index(&self, name: &str) -> Result<usize> {
        let names = (0..self.output_tensor_count()?)
            .map(|i| Ok((i, self.output_tensor(i)?.name())))
            .collect::<Result<Vec<_>>>()?;

        names
            .iter()
            .find(|(_, n)| n == name)
            .map(|(i, _)| *i)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Output error: '{}' is not a valid name for any output. Names of outputs and their indexes are {}",
                    name,
                    Self::names(names.into_iter())
                ))
            })
    }

    /// Returns how long the last run spent in the native runtime, or `None`
    /// before the first run.
    pub fn last_native_inference_duration_nanoseconds(&self) -> Result<Option<i64>> {
        self.inner()?;
        Ok(self.last_inference_ns)
    }

    /// Recreates the native interpreter with `options`, keeping input resizes.
    fn rebuild(&mut self, options: Options) -> Result<()> {
        let model = self.inner.take().ok_or(Error::InterpreterClosed)?.delete();
        self.inner = Some(Inner::create(model, &options)?);
        self.options = options;
        self.allocated = false;

        let inner = self.inner()?;
        for (index, dims) in &self.resized {
            inner.resize(*index, dims)?;
        }
        self.allocate()
    }

    #[deprecated(note = "build the interpreter with `Options::builder().num_threads(..)`")]
    pub fn set_num_threads(&mut self, num_threads: i32) -> Result<()> {
        let options = self.options.to_builder().num_threads(num_threads).build();
        self.rebuild(options)
    }

    #[deprecated(note = "build the interpreter with `Options::builder().use_nnapi(..)`")]
    pub fn set_use_nnapi(&mut self, use_nnapi: bool) -> Result<()> {
        let options = self.options.to_builder().use_nnapi(use_nnapi).build();
        self.rebuild(options)
    }

    /// Releases the native interpreter and the model.
    ///
    /// Calls after the first are no-ops; every other call fails with
    /// [`Error::InterpreterClosed`] afterwards.
    pub fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            drop(inner.delete());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!("Interpreter dropped without being closed; closing it now");
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &[u8] = b"TFLB\n\
        inputs: x\n\
        outputs: y\n\
        x = Placeholder() dtype=float shape=[?, 2]\n\
        w = Const() value=[3.0, 4.0]\n\
        y = Mul(x, w)\n";

    #[test]
    fn array_run_resizes() {
        let mut interpreter = Interpreter::from_bytes(MODEL.to_vec(), Options::default()).unwrap();
        let input = NdArray::new(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mut output = NdArray::empty(DataType::Float32);

        interpreter.run(&input, &mut output).unwrap();
        assert_eq!(output.dims(), &[2, 2]);
        assert_eq!(output.as_slice::<f32>().unwrap(), &[3.0, 8.0, 9.0, 16.0]);
        assert!(interpreter
            .last_native_inference_duration_nanoseconds()
            .unwrap()
            .is_some());
        interpreter.close();
    }

    #[test]
    fn byte_run_checks_size() {
        let mut interpreter = Interpreter::from_bytes(MODEL.to_vec(), Options::default()).unwrap();
        let input: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 1.0]).to_vec();
        let mut output = [0u8; 8];
        interpreter.run(&input[..], &mut output[..]).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, f32>(&output), &[3.0, 4.0]);

        let err = interpreter.run(&input[..4], &mut output[..]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        interpreter.close();
    }

    #[test]
    fn string_copy_needs_existing_storage() {
        let model = b"TFLB\n\
            inputs: s\n\
            outputs: t\n\
            s = Placeholder() dtype=string shape=[2]\n\
            t = Identity(s)\n";
        let mut interpreter = Interpreter::from_bytes(model.to_vec(), Options::default()).unwrap();
        let input = NdArray::from_strings(&[2], vec![b"a".to_vec(), b"b".to_vec()]).unwrap();
        let bytes = input.data().to_bytes();

        let tensor = interpreter.input_tensor(0).unwrap();
        assert_eq!(tensor.byte_size(), 0);
        let status = unsafe {
            ffi::TfLiteTensorCopyFromBuffer(tensor.as_ptr(), bytes.as_ptr() as *const _, bytes.len())
        };
        assert_ne!(status, ffi::kTfLiteOk);

        let err = interpreter.run(&input, &mut NdArray::empty(DataType::String)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        interpreter.close();
    }

    #[test]
    fn rebuild_keeps_resizes() {
        let mut interpreter = Interpreter::from_bytes(MODEL.to_vec(), Options::default()).unwrap();
        interpreter.resize_input(0, &[3, 2]).unwrap();

        #[allow(deprecated)]
        interpreter.set_num_threads(2).unwrap();
        assert_eq!(interpreter.options().num_threads(), 2);
        assert_eq!(interpreter.input_tensor(0).unwrap().shape(), vec![3, 2]);
        interpreter.close();
    }
}
