// SPDX-License-Identifier: Apache-2.0

use super::eval::Evaluator;
use super::graph::{Attr, Endpoint, GraphState};
use super::tensor::Value;
use super::text::{parse_graph_with, parse_lite_model, resolve, LiteModelText};
use super::*;
use log::{debug, error};
use std::ffi::{c_char, c_void, CString};

fn lite_type(dtype: TF_DataType) -> TfLiteType {
    match dtype {
        TF_FLOAT => kTfLiteFloat32,
        TF_INT32 => kTfLiteInt32,
        TF_UINT8 => kTfLiteUInt8,
        TF_INT64 => kTfLiteInt64,
        TF_STRING => kTfLiteString,
        TF_BOOL => kTfLiteBool,
        _ => kTfLiteNoType,
    }
}

fn graph_type(dtype: TfLiteType) -> TF_DataType {
    match dtype {
        kTfLiteFloat32 => TF_FLOAT,
        kTfLiteInt32 => TF_INT32,
        kTfLiteUInt8 => TF_UINT8,
        kTfLiteInt64 => TF_INT64,
        kTfLiteString => TF_STRING,
        kTfLiteBool => TF_BOOL,
        _ => 0,
    }
}

/// Receives each diagnostic the interpreter reports, already formatted.
pub type TfLiteErrorReporter = unsafe extern "C" fn(user_data: *mut c_void, message: *const c_char);

#[derive(Debug, Clone, Copy)]
struct Reporter {
    report: TfLiteErrorReporter,
    user_data: *mut c_void,
}

impl Reporter {
    fn status(reporter: Option<Reporter>, result: Result<(), Failure>) -> TfLiteStatus {
        match result {
            Ok(()) => kTfLiteOk,
            Err(f) => {
                match reporter {
                    Some(r) => {
                        let message = CString::new(f.message.replace('\0', " ")).unwrap_or_default();
                        // SAFETY: the caller installed a reporter that outlives the interpreter
                        unsafe { (r.report)(r.user_data, message.as_ptr()) };
                    }
                    None => error!("{}", f.message),
                }
                kTfLiteError
            }
        }
    }
}

#[derive(Debug)]
pub struct TfLiteModel {
    text: LiteModelText,
}

pub unsafe fn TfLiteModelCreate(model_data: *const c_void, model_size: usize) -> *mut TfLiteModel {
    if model_data.is_null() {
        error!("model data is null");
        return std::ptr::null_mut();
    }

    let bytes = std::slice::from_raw_parts(model_data as *const u8, model_size);
    match parse_lite_model(bytes) {
        Ok(text) => Box::into_raw(Box::new(TfLiteModel { text })),
        Err(f) => {
            error!("{}", f.message);
            std::ptr::null_mut()
        }
    }
}

pub unsafe fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel {
    let bytes = c_str(model_path).and_then(|p| {
        std::fs::read(p).map_err(|e| Failure::not_found(format!("Could not open '{}': {}", p, e)))
    });

    match bytes {
        Ok(b) => TfLiteModelCreate(b.as_ptr() as *const c_void, b.len()),
        Err(f) => {
            error!("{}", f.message);
            std::ptr::null_mut()
        }
    }
}

pub unsafe fn TfLiteModelDelete(model: *mut TfLiteModel) {
    if !model.is_null() {
        drop(Box::from_raw(model));
    }
}

/// A delegate handle. The mock records delegates but executes
/// every node itself.
#[repr(C)]
#[derive(Debug)]
pub struct TfLiteDelegate {
    pub data_: *mut c_void,
    pub flags: i64,
}

impl Default for TfLiteDelegate {
    fn default() -> Self {
        TfLiteDelegate {
            data_: std::ptr::null_mut(),
            flags: 0,
        }
    }
}

#[derive(Debug)]
pub struct TfLiteInterpreterOptions {
    num_threads: i32,
    use_nnapi: bool,
    allow_fp16: bool,
    delegates: Vec<*mut TfLiteDelegate>,
    reporter: Option<Reporter>,
}

pub unsafe fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions {
    Box::into_raw(Box::new(TfLiteInterpreterOptions {
        num_threads: -1,
        use_nnapi: false,
        allow_fp16: false,
        delegates: Vec::new(),
        reporter: None,
    }))
}

pub unsafe fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions) {
    if !options.is_null() {
        drop(Box::from_raw(options));
    }
}

pub unsafe fn TfLiteInterpreterOptionsSetNumThreads(
    options: *mut TfLiteInterpreterOptions,
    num_threads: i32,
) {
    (*options).num_threads = num_threads;
}

pub unsafe fn TfLiteInterpreterOptionsAddDelegate(
    options: *mut TfLiteInterpreterOptions,
    delegate: *mut TfLiteDelegate,
) {
    let options = &mut *options;
    options.delegates.push(delegate);
}

pub unsafe fn TfLiteInterpreterOptionsSetUseNNAPI(
    options: *mut TfLiteInterpreterOptions,
    enable: bool,
) {
    (*options).use_nnapi = enable;
}

pub unsafe fn TfLiteInterpreterOptionsSetErrorReporter(
    options: *mut TfLiteInterpreterOptions,
    reporter: Option<TfLiteErrorReporter>,
    user_data: *mut c_void,
) {
    (*options).reporter = reporter.map(|report| Reporter { report, user_data });
}

pub unsafe fn TfLiteInterpreterOptionsSetAllowFp16PrecisionForFp32(
    options: *mut TfLiteInterpreterOptions,
    allow: bool,
) {
    (*options).allow_fp16 = allow;
}

#[derive(Debug)]
pub struct TfLiteTensor {
    name: CString,
    dtype: TfLiteType,
    dims: Vec<i32>,
    data: Vec<u8>,
    allocated: bool,
}

impl TfLiteTensor {
    fn new(name: &str, dtype: TfLiteType, dims: Vec<i32>) -> Result<*mut Self, Failure> {
        let name = CString::new(name).map_err(|e| Failure::invalid_argument(format!("{}", e)))?;
        Ok(Box::into_raw(Box::new(TfLiteTensor {
            name,
            dtype,
            dims,
            data: Vec::new(),
            allocated: false,
        })))
    }

    /// Fixed-width tensors own `dims` worth of elements; string tensors
    /// are dynamic and only as large as their current contents.
    fn byte_size(&self) -> usize {
        match dtype_size(graph_type(self.dtype)) {
            Some(size) => size * self.dims.iter().map(|d| (*d).max(0) as usize).product::<usize>(),
            None => self.data.len(),
        }
    }

    fn allocate(&mut self) {
        let size = self.byte_size();
        if self.data.len() != size {
            self.data = vec![0; size];
        }
        self.allocated = true;
    }

    fn value(&self) -> Result<Value, Failure> {
        let dims = self.dims.iter().map(|d| *d as i64).collect();
        Value::from_bytes(graph_type(self.dtype), dims, &self.data)
    }

    fn store(&mut self, value: Value) -> Result<(), Failure> {
        if lite_type(value.dtype) != self.dtype {
            return Err(Failure::invalid_argument(format!(
                "output '{}' produced dtype {}",
                self.name.to_string_lossy(),
                dtype_name(value.dtype)
            )));
        }

        self.dims = value.dims.iter().map(|d| *d as i32).collect();
        self.data = value.to_bytes()?;
        Ok(())
    }
}

fn tensor_dims(shape: &Option<Vec<i64>>) -> Vec<i32> {
    // Unknown dimensions start out as 1 until resized.
    shape
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|d| if *d < 0 { 1 } else { *d as i32 })
        .collect()
}

#[derive(Debug)]
pub struct TfLiteInterpreter {
    model: LiteModelText,
    state: GraphState,
    /// Shapes declared by the model's input placeholders.
    signatures: Vec<Option<Vec<i64>>>,
    inputs: Vec<*mut TfLiteTensor>,
    outputs: Vec<*mut TfLiteTensor>,
    input_ends: Vec<Endpoint>,
    output_ends: Vec<Endpoint>,
    reporter: Option<Reporter>,
}

impl Drop for TfLiteInterpreter {
    fn drop(&mut self) {
        for t in self.inputs.drain(..).chain(self.outputs.drain(..)) {
            // SAFETY: every tensor came from `Box::into_raw`
            unsafe { drop(Box::from_raw(t)) };
        }
    }
}

impl TfLiteInterpreter {
    fn build(model: &TfLiteModel, reporter: Option<Reporter>) -> Result<Self, Failure> {
        let text = model.text.clone();
        let mut state = GraphState::default();
        parse_graph_with(&text.graph, &mut state, |_| {})?;

        let input_ends = text
            .inputs
            .iter()
            .map(|n| resolve(&state, n))
            .collect::<Result<Vec<_>, _>>()?;
        let output_ends = text
            .outputs
            .iter()
            .map(|n| resolve(&state, n))
            .collect::<Result<Vec<_>, _>>()?;

        let mut interpreter = TfLiteInterpreter {
            model: text,
            signatures: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            input_ends,
            output_ends,
            state,
            reporter,
        };

        for (name, e) in interpreter.model.inputs.iter().zip(&interpreter.input_ends) {
            let op = interpreter.state.op(e.op);
            if op.op_type() != "Placeholder" {
                return Err(Failure::invalid_argument(format!(
                    "input '{}' is a {}, not a Placeholder",
                    name,
                    op.op_type()
                )));
            }
            let spec = interpreter.state.spec(*e);
            interpreter.signatures.push(spec.shape.clone());
            interpreter.inputs.push(TfLiteTensor::new(
                op.name(),
                lite_type(spec.dtype),
                tensor_dims(&spec.shape),
            )?);
        }

        for (name, e) in interpreter.model.outputs.iter().zip(&interpreter.output_ends) {
            let spec = interpreter.state.spec(*e);
            interpreter.outputs.push(TfLiteTensor::new(
                name,
                lite_type(spec.dtype),
                tensor_dims(&spec.shape),
            )?);
        }

        Ok(interpreter)
    }

    /// Re-infers every shape from the current input dimensions.
    fn allocate(&mut self) -> Result<(), Failure> {
        let mut state = GraphState::default();
        let overrides: Vec<(String, Vec<i64>)> = self
            .inputs
            .iter()
            .map(|t| {
                // SAFETY: tensors are owned by the interpreter
                let t = unsafe { &**t };
                (
                    t.name.to_string_lossy().into_owned(),
                    t.dims.iter().map(|d| *d as i64).collect(),
                )
            })
            .collect();

        parse_graph_with(&self.model.graph, &mut state, |def| {
            if let Some((_, dims)) = overrides.iter().find(|(n, _)| *n == def.name) {
                def.attrs
                    .insert("shape".to_owned(), Attr::Shape(Some(dims.clone())));
            }
        })?;

        for (t, e) in self.inputs.iter().zip(&self.input_ends) {
            let t = unsafe { &mut **t };
            t.dtype = lite_type(state.spec(*e).dtype);
            t.allocate();
        }
        for (t, e) in self.outputs.iter().zip(&self.output_ends) {
            let t = unsafe { &mut **t };
            t.dims = tensor_dims(&state.spec(*e).shape);
            t.allocate();
        }

        self.state = state;
        Ok(())
    }

    fn invoke(&mut self) -> Result<(), Failure> {
        let mut feeds = Vec::new();
        for (t, e) in self.inputs.iter().zip(&self.input_ends) {
            let t = unsafe { &**t };
            if !t.allocated {
                return Err(Failure::failed_precondition(
                    "Invoke called on model that is not ready.",
                ));
            }
            feeds.push((*e, t.value()?));
        }

        let mut eval = Evaluator::new(&self.state, feeds)?;
        let mut values = Vec::new();
        for e in &self.output_ends {
            values.push(eval.output(*e)?);
        }

        for (t, v) in self.outputs.iter().zip(values) {
            unsafe { &mut **t }.store(v)?;
        }
        Ok(())
    }
}

pub unsafe fn TfLiteInterpreterCreate(
    model: *const TfLiteModel,
    optional_options: *const TfLiteInterpreterOptions,
) -> *mut TfLiteInterpreter {
    let options = optional_options.as_ref();
    let reporter = options.and_then(|o| o.reporter);
    if let Some(options) = options {
        debug!(
            "interpreter options: threads={} nnapi={} fp16={} delegates={}",
            options.num_threads,
            options.use_nnapi,
            options.allow_fp16,
            options.delegates.len()
        );
    }

    let built = model
        .as_ref()
        .ok_or_else(|| Failure::invalid_argument("model is null"))
        .and_then(|m| TfLiteInterpreter::build(m, reporter));
    match built {
        Ok(interpreter) => Box::into_raw(Box::new(interpreter)),
        Err(f) => {
            Reporter::status(reporter, Err(f));
            std::ptr::null_mut()
        }
    }
}

pub unsafe fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter) {
    if !interpreter.is_null() {
        drop(Box::from_raw(interpreter));
    }
}

pub unsafe fn TfLiteInterpreterGetInputTensorCount(interpreter: *const TfLiteInterpreter) -> i32 {
    let interpreter = &*interpreter;
    interpreter.inputs.len() as i32
}

pub unsafe fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> i32 {
    let interpreter = &*interpreter;
    interpreter.outputs.len() as i32
}

pub unsafe fn TfLiteInterpreterGetInputTensor(
    interpreter: *const TfLiteInterpreter,
    input_index: i32,
) -> *mut TfLiteTensor {
    let interpreter = &*interpreter;
    usize::try_from(input_index)
        .ok()
        .and_then(|i| interpreter.inputs.get(i).copied())
        .unwrap_or(std::ptr::null_mut())
}

pub unsafe fn TfLiteInterpreterGetOutputTensor(
    interpreter: *const TfLiteInterpreter,
    output_index: i32,
) -> *const TfLiteTensor {
    let interpreter = &*interpreter;
    usize::try_from(output_index)
        .ok()
        .and_then(|i| interpreter.outputs.get(i).copied())
        .map_or(std::ptr::null(), |t| t as *const TfLiteTensor)
}

pub unsafe fn TfLiteInterpreterResizeInputTensor(
    interpreter: *mut TfLiteInterpreter,
    input_index: i32,
    input_dims: *const i32,
    input_dims_size: i32,
) -> TfLiteStatus {
    let interpreter = &mut *interpreter;
    let reporter = interpreter.reporter;
    Reporter::status(reporter, (|| {
        let i = usize::try_from(input_index)
            .ok()
            .filter(|i| *i < interpreter.inputs.len())
            .ok_or_else(|| Failure::invalid_argument(format!("Invalid tensor index {}", input_index)))?;

        let dims = if input_dims_size <= 0 {
            Vec::new()
        } else {
            std::slice::from_raw_parts(input_dims, input_dims_size as usize).to_vec()
        };
        if dims.iter().any(|d| *d < 0) {
            return Err(Failure::invalid_argument(format!(
                "Cannot resize input {} to {:?}",
                i, dims
            )));
        }

        if let Some(signature) = &interpreter.signatures[i] {
            let fits = signature.len() == dims.len()
                && signature
                    .iter()
                    .zip(&dims)
                    .all(|(s, d)| *s < 0 || *s == *d as i64);
            if !fits {
                return Err(Failure::invalid_argument(format!(
                    "Cannot resize input {} declared as {:?} to {:?}",
                    i, signature, dims
                )));
            }
        }

        let t = &mut *interpreter.inputs[i];
        if t.dims != dims {
            t.dims = dims;
            t.data.clear();
            t.allocated = false;
        }
        Ok(())
    })())
}

pub unsafe fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> TfLiteStatus {
    let interpreter = &mut *interpreter;
    Reporter::status(interpreter.reporter, interpreter.allocate())
}

pub unsafe fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> TfLiteStatus {
    let interpreter = &mut *interpreter;
    Reporter::status(interpreter.reporter, interpreter.invoke())
}

pub unsafe fn TfLiteTensorType(tensor: *const TfLiteTensor) -> TfLiteType {
    (*tensor).dtype
}

pub unsafe fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> i32 {
    let tensor = &*tensor;
    tensor.dims.len() as i32
}

pub unsafe fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: i32) -> i32 {
    let tensor = &*tensor;
    tensor.dims.get(dim_index as usize).copied().unwrap_or(-1)
}

pub unsafe fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize {
    (*tensor).byte_size()
}

pub unsafe fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void {
    let t = &*tensor;
    if !t.allocated || t.data.is_empty() {
        return std::ptr::null_mut();
    }
    t.data.as_ptr() as *mut c_void
}

pub unsafe fn TfLiteTensorName(tensor: *const TfLiteTensor) -> *const c_char {
    let tensor = &*tensor;
    tensor.name.as_ptr()
}

/// Fails unless `input_data_size` is exactly the tensor's byte size.
pub unsafe fn TfLiteTensorCopyFromBuffer(
    tensor: *mut TfLiteTensor,
    input_data: *const c_void,
    input_data_size: usize,
) -> TfLiteStatus {
    let t = &mut *tensor;
    if !t.allocated || input_data_size != t.byte_size() {
        return kTfLiteError;
    }

    if input_data_size > 0 {
        t.data
            .copy_from_slice(std::slice::from_raw_parts(input_data as *const u8, input_data_size));
    }
    kTfLiteOk
}

pub unsafe fn TfLiteTensorCopyToBuffer(
    tensor: *const TfLiteTensor,
    output_data: *mut c_void,
    output_data_size: usize,
) -> TfLiteStatus {
    let t = &*tensor;
    if t.data.len() != output_data_size {
        return kTfLiteError;
    }

    if output_data_size > 0 {
        std::slice::from_raw_parts_mut(output_data as *mut u8, output_data_size)
            .copy_from_slice(&t.data);
    }
    kTfLiteOk
}
