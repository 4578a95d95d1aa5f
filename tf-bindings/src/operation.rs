// SPDX-License-Identifier: Apache-2.0

use crate::graph::GraphInner;
use crate::handle::Reference;
use crate::{cstring, ffi, string_from, DataType, Error, Graph, Handle, Result, Status, Tensor, TensorType};
use log::warn;
use std::ffi::c_int;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// A node of a [`Graph`].
///
/// Holds the native operation handle together with a back-reference to the
/// graph. The handle is only dereferenced while the graph is pinned, so
/// every accessor fails with [`Error::GraphClosed`] once the graph is gone.
#[derive(Clone)]
pub struct Operation {
    graph: Arc<GraphInner>,
    handle: NonNull<ffi::TF_Operation>,
}

// Only dereferenced under a graph reference.
unsafe impl Send for Operation {}
unsafe impl Sync for Operation {}

impl Operation {
    pub(crate) fn new(graph: Arc<GraphInner>, handle: NonNull<ffi::TF_Operation>) -> Self {
        Operation { graph, handle }
    }

    /// Runs `f` with the graph pinned.
    fn pinned<R>(
        &self,
        f: impl FnOnce(*mut ffi::TF_Graph, *mut ffi::TF_Operation) -> Result<R>,
    ) -> Result<R> {
        let graph = self.graph.reference()?;
        f(graph.as_ptr(), self.handle.as_ptr())
    }

    pub(crate) fn belongs_to(&self, graph: &Arc<GraphInner>) -> bool {
        Arc::ptr_eq(&self.graph, graph)
    }

    pub(crate) fn as_native(&self) -> *mut ffi::TF_Operation {
        self.handle.as_ptr()
    }

    /// Returns the full name of the operation.
    pub fn name(&self) -> Result<String> {
        self.pinned(|_, op| Ok(unsafe { string_from(ffi::TF_OperationName(op)) }))
    }

    /// Returns the type of the operation, e.g. `"MatMul"`.
    pub fn op_type(&self) -> Result<String> {
        self.pinned(|_, op| Ok(unsafe { string_from(ffi::TF_OperationOpType(op)) }))
    }

    /// Returns the device the operation is placed on, if any.
    pub fn device(&self) -> Result<String> {
        self.pinned(|_, op| Ok(unsafe { string_from(ffi::TF_OperationDevice(op)) }))
    }

    pub fn num_outputs(&self) -> Result<usize> {
        self.pinned(|_, op| Ok(unsafe { ffi::TF_OperationNumOutputs(op) }.max(0) as usize))
    }

    pub fn num_inputs(&self) -> Result<usize> {
        self.pinned(|_, op| Ok(unsafe { ffi::TF_OperationNumInputs(op) }.max(0) as usize))
    }

    /// Returns the number of outputs making up the output argument `arg_name`.
    pub fn output_list_length(&self, arg_name: &str) -> Result<usize> {
        let arg_name = cstring(arg_name)?;
        self.pinned(|_, op| {
            let mut status = Status::new()?;
            let len = unsafe {
                ffi::TF_OperationOutputListLength(op, arg_name.as_ptr(), status.as_mut_ptr())
            };
            status.check()?;
            Ok(len.max(0) as usize)
        })
    }

    /// Returns the number of inputs making up the input argument `arg_name`.
    pub fn input_list_length(&self, arg_name: &str) -> Result<usize> {
        let arg_name = cstring(arg_name)?;
        self.pinned(|_, op| {
            let mut status = Status::new()?;
            let len = unsafe {
                ffi::TF_OperationInputListLength(op, arg_name.as_ptr(), status.as_mut_ptr())
            };
            status.check()?;
            Ok(len.max(0) as usize)
        })
    }

    /// Returns `length` consecutive outputs starting at `start`.
    ///
    /// The range is not checked against the operation; it stops short at
    /// `usize::MAX`.
    pub fn output_list(&self, start: usize, length: usize) -> Vec<Output> {
        (start..start.saturating_add(length))
            .map(|i| self.output(i))
            .collect()
    }

    /// Returns the output at `index`.
    pub fn output(&self, index: usize) -> Output {
        Output::new(self.clone(), index)
    }

    /// Returns the shape of output `index`.
    ///
    /// `None` means the rank is unknown; unknown dimensions are -1.
    pub fn shape(&self, index: usize) -> Result<Option<Vec<i64>>> {
        self.pinned(|graph, op| {
            let output = ffi::TF_Output {
                oper: op,
                index: index as c_int,
            };

            let mut status = Status::new()?;
            let num_dims =
                unsafe { ffi::TF_GraphGetTensorNumDims(graph, output, status.as_mut_ptr()) };
            status.check()?;
            if num_dims < 0 {
                return Ok(None);
            }

            let mut dims = vec![0i64; num_dims as usize];
            unsafe {
                ffi::TF_GraphGetTensorShape(
                    graph,
                    output,
                    dims.as_mut_ptr(),
                    num_dims,
                    status.as_mut_ptr(),
                )
            };
            status.check()?;
            Ok(Some(dims))
        })
    }

    /// Returns the element type of output `index`.
    pub fn dtype(&self, index: usize) -> Result<DataType> {
        self.pinned(|_, op| {
            let code = unsafe {
                ffi::TF_OperationOutputType(ffi::TF_Output {
                    oper: op,
                    index: index as c_int,
                })
            };
            DataType::from_tf(code)
        })
    }
}

/// Compares handles without pinning the graph; operations of different
/// graphs are never equal.
impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph) && self.handle == other.handle
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.handle.as_ptr() as usize).hash(state);
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.op_type(), self.name()) {
            (Ok(op_type), Ok(name)) => write!(f, "<{} '{}'>", op_type, name),
            _ => write!(f, "<closed operation>"),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Operation")
            .field("handle", &self.handle)
            .field("name", &self.name().ok())
            .finish()
    }
}

/// A symbolic handle to the tensor produced at `index` by an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Output {
    operation: Operation,
    index: usize,
}

impl Output {
    pub fn new(operation: Operation, index: usize) -> Self {
        Output { operation, index }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shape(&self) -> Result<Option<Vec<i64>>> {
        self.operation.shape(self.index)
    }

    pub fn data_type(&self) -> Result<DataType> {
        self.operation.dtype(self.index)
    }

    /// Verifies that the output holds elements of type `T`.
    pub fn check_type<T: TensorType>(&self) -> Result<()> {
        let data_type = self.data_type()?;
        if data_type != T::data_type() {
            return Err(Error::InvalidArgument(format!(
                "Output {} of {} has type {:?}, not {:?}",
                self.index,
                self.operation,
                data_type,
                T::data_type()
            )));
        }
        Ok(())
    }

    /// Converts to the native form used by `graph`.
    ///
    /// The caller must hold a reference to the graph.
    pub(crate) fn to_native(&self, graph: &Arc<GraphInner>) -> Result<ffi::TF_Output> {
        if !self.operation.belongs_to(graph) {
            return Err(Error::InvalidArgument(format!(
                "{} does not belong to this graph",
                self
            )));
        }

        Ok(ffi::TF_Output {
            oper: self.operation.as_native(),
            index: self.index as c_int,
        })
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.operation, self.index)
    }
}

/// Adds a single operation to a [`Graph`].
///
/// The graph stays pinned until [`finish`](Self::finish) is called or the
/// builder is dropped.
pub struct OperationBuilder<'a> {
    graph: &'a Graph,
    _reference: Reference<'a, ffi::TF_Graph>,
    desc: NonNull<ffi::TF_OperationDescription>,
    name: String,
    finished: bool,
}

impl<'a> OperationBuilder<'a> {
    pub(crate) fn new(graph: &'a Graph, op_type: &str, name: &str) -> Result<Self> {
        let c_type = cstring(op_type)?;
        let c_name = cstring(name)?;

        let reference = graph.reference()?;
        let desc = NonNull::new(unsafe {
            ffi::TF_NewOperation(reference.as_ptr(), c_type.as_ptr(), c_name.as_ptr())
        })
        .ok_or(Error::EmptyValue)?;

        Ok(OperationBuilder {
            graph,
            _reference: reference,
            desc,
            name: name.to_string(),
            finished: false,
        })
    }

    fn native(&self, output: &Output) -> Result<ffi::TF_Output> {
        output.to_native(self.graph.inner())
    }

    pub fn add_input(self, input: &Output) -> Result<Self> {
        let input = self.native(input)?;
        unsafe { ffi::TF_AddInput(self.desc.as_ptr(), input) };
        Ok(self)
    }

    pub fn add_input_list(self, inputs: &[Output]) -> Result<Self> {
        let inputs = self.graph.to_native(inputs)?;
        unsafe {
            ffi::TF_AddInputList(self.desc.as_ptr(), inputs.as_ptr(), inputs.len() as c_int)
        };
        Ok(self)
    }

    pub fn set_device(self, device: &str) -> Result<Self> {
        let device = cstring(device)?;
        unsafe { ffi::TF_SetDevice(self.desc.as_ptr(), device.as_ptr()) };
        Ok(self)
    }

    pub fn set_attr_type(self, attr_name: &str, value: DataType) -> Result<Self> {
        let attr_name = cstring(attr_name)?;
        unsafe { ffi::TF_SetAttrType(self.desc.as_ptr(), attr_name.as_ptr(), value.to_tf()) };
        Ok(self)
    }

    pub fn set_attr_int(self, attr_name: &str, value: i64) -> Result<Self> {
        let attr_name = cstring(attr_name)?;
        unsafe { ffi::TF_SetAttrInt(self.desc.as_ptr(), attr_name.as_ptr(), value) };
        Ok(self)
    }

    /// Sets a shape attribute; `None` leaves the rank unknown.
    pub fn set_attr_shape(self, attr_name: &str, dims: Option<&[i64]>) -> Result<Self> {
        let attr_name = cstring(attr_name)?;
        let (ptr, num_dims) = match dims {
            Some(d) => (d.as_ptr(), d.len() as c_int),
            None => (ptr::null(), -1),
        };
        unsafe { ffi::TF_SetAttrShape(self.desc.as_ptr(), attr_name.as_ptr(), ptr, num_dims) };
        Ok(self)
    }

    pub fn set_attr_tensor(self, attr_name: &str, value: &Tensor) -> Result<Self> {
        let attr_name = cstring(attr_name)?;
        let mut status = Status::new()?;
        unsafe {
            ffi::TF_SetAttrTensor(
                self.desc.as_ptr(),
                attr_name.as_ptr(),
                value.as_ptr() as *mut _,
                status.as_mut_ptr(),
            )
        };
        status.check()?;
        Ok(self)
    }

    /// Adds the operation to the graph.
    pub fn finish(mut self) -> Result<Operation> {
        // The description is consumed whatever the outcome.
        self.finished = true;

        let mut status = Status::new()?;
        let op = unsafe { ffi::TF_FinishOperation(self.desc.as_ptr(), status.as_mut_ptr()) };
        status.check()?;

        let op = NonNull::new(op).ok_or(Error::EmptyValue)?;
        Ok(Operation::new(self.graph.inner().clone(), op))
    }
}

impl Drop for OperationBuilder<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                "Operation '{}' was never finished; its description is leaked",
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn graph_with_ops() -> (Graph, Operation, Operation) {
        let graph = Graph::new().unwrap();
        let x = graph
            .new_operation("Placeholder", "x")
            .unwrap()
            .set_attr_type("dtype", DataType::Float32)
            .unwrap()
            .set_attr_shape("shape", Some(&[-1, 3]))
            .unwrap()
            .finish()
            .unwrap();
        let sum = graph
            .new_operation("AddN", "sum")
            .unwrap()
            .add_input_list(&[x.output(0), x.output(0)])
            .unwrap()
            .finish()
            .unwrap();
        (graph, x, sum)
    }

    #[test]
    fn accessors() {
        let (_graph, x, sum) = graph_with_ops();

        assert_eq!(x.name().unwrap(), "x");
        assert_eq!(x.op_type().unwrap(), "Placeholder");
        assert_eq!(x.num_outputs().unwrap(), 1);
        assert_eq!(x.num_inputs().unwrap(), 0);
        assert_eq!(x.shape(0).unwrap(), Some(vec![-1, 3]));
        assert_eq!(x.dtype(0).unwrap(), DataType::Float32);
        assert_eq!(x.to_string(), "<Placeholder 'x'>");

        assert_eq!(sum.num_inputs().unwrap(), 2);
        assert_eq!(sum.input_list_length("inputs").unwrap(), 2);
        assert!(matches!(
            sum.output_list_length("bogus"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_rank() {
        let graph = Graph::new().unwrap();
        let x = graph
            .new_operation("Placeholder", "x")
            .unwrap()
            .set_attr_type("dtype", DataType::Int32)
            .unwrap()
            .finish()
            .unwrap();
        assert_eq!(x.shape(0).unwrap(), None);
    }

    #[test]
    fn equality_and_hash() {
        let (graph, x, sum) = graph_with_ops();
        let again = graph.operation("x").unwrap().unwrap();

        assert_eq!(x, again);
        assert_ne!(x, sum);

        let set: HashSet<Operation> = [x.clone(), again, sum].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert_eq!(x.output(0), x.output_list(0, 1)[0]);
    }

    #[test]
    fn output_list_stops_at_usize_max() {
        let (_graph, x, _) = graph_with_ops();
        assert!(x.output_list(usize::MAX, 2).is_empty());

        let tail = x.output_list(usize::MAX - 1, 5);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].index(), usize::MAX - 1);
    }

    #[test]
    fn check_type() {
        let (_graph, x, _) = graph_with_ops();
        let out = x.output(0);
        assert!(out.check_type::<f32>().is_ok());
        assert!(matches!(
            out.check_type::<i64>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn inputs_from_another_graph() {
        let (_graph, x, _) = graph_with_ops();
        let other = Graph::new().unwrap();

        let err = other
            .new_operation("Identity", "y")
            .unwrap()
            .add_input(&x.output(0))
            .err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn failed_finish_reports_status() {
        let graph = Graph::new().unwrap();
        let err = graph
            .new_operation("NoSuchOp", "n")
            .unwrap()
            .finish()
            .unwrap_err();
        assert!(err.code().is_some());
    }
}
