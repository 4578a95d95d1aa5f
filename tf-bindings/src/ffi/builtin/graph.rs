// SPDX-License-Identifier: Apache-2.0

use super::status::{report, TF_Status};
use super::*;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, CString};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Output `index` of the operation created `op`-th in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Endpoint {
    pub op: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Attr {
    Type(TF_DataType),
    Shape(Option<Vec<i64>>),
    Tensor(Value),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OutputSpec {
    pub dtype: TF_DataType,
    /// `None` when the rank is unknown; `-1` entries are unknown dimensions.
    pub shape: Option<Vec<i64>>,
}

#[derive(Debug, Clone)]
pub(crate) enum InputArg {
    Single(Endpoint),
    List(Vec<Endpoint>),
}

/// A node waiting to be added to a graph.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeDef {
    pub name: String,
    pub op_type: String,
    pub device: String,
    pub inputs: Vec<InputArg>,
    pub attrs: HashMap<String, Attr>,
}

impl NodeDef {
    pub fn new(op_type: &str, name: impl Into<String>) -> Self {
        NodeDef {
            name: name.into(),
            op_type: op_type.to_owned(),
            ..Default::default()
        }
    }

    pub fn input(mut self, e: Endpoint) -> Self {
        self.inputs.push(InputArg::Single(e));
        self
    }

    pub fn input_list(mut self, list: Vec<Endpoint>) -> Self {
        self.inputs.push(InputArg::List(list));
        self
    }

    pub fn attr(mut self, name: &str, attr: Attr) -> Self {
        self.attrs.insert(name.to_owned(), attr);
        self
    }
}

#[derive(Debug)]
pub struct TF_Operation {
    pub(crate) id: usize,
    name: CString,
    op_type: CString,
    device: CString,
    pub(crate) inputs: Vec<Endpoint>,
    input_args: Vec<(&'static str, usize)>,
    pub(crate) attrs: HashMap<String, Attr>,
    pub(crate) outputs: Vec<OutputSpec>,
    output_args: Vec<(&'static str, usize)>,
}

impl TF_Operation {
    pub(crate) fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub(crate) fn op_type(&self) -> &str {
        self.op_type.to_str().unwrap_or_default()
    }
}

struct ArgDef {
    name: &'static str,
    list: bool,
}

const fn single(name: &'static str) -> ArgDef {
    ArgDef { name, list: false }
}

type InferFn = fn(&NodeDef, &[&OutputSpec]) -> Result<Vec<OutputSpec>, Failure>;

struct OpDef {
    op_type: &'static str,
    inputs: &'static [ArgDef],
    output: Option<&'static str>,
    infer: InferFn,
}

static OPS: &[OpDef] = &[
    OpDef {
        op_type: "Placeholder",
        inputs: &[],
        output: Some("output"),
        infer: infer_placeholder,
    },
    OpDef {
        op_type: "Const",
        inputs: &[],
        output: Some("output"),
        infer: infer_const,
    },
    OpDef {
        op_type: "Identity",
        inputs: &[single("input")],
        output: Some("output"),
        infer: infer_unary,
    },
    OpDef {
        op_type: "Square",
        inputs: &[single("x")],
        output: Some("y"),
        infer: infer_unary,
    },
    OpDef {
        op_type: "OnesLike",
        inputs: &[single("x")],
        output: Some("y"),
        infer: infer_unary,
    },
    OpDef {
        op_type: "ZerosLike",
        inputs: &[single("x")],
        output: Some("y"),
        infer: infer_unary,
    },
    OpDef {
        op_type: "Mul",
        inputs: &[single("x"), single("y")],
        output: Some("z"),
        infer: infer_binary,
    },
    OpDef {
        op_type: "AddV2",
        inputs: &[single("x"), single("y")],
        output: Some("z"),
        infer: infer_binary,
    },
    OpDef {
        op_type: "AddN",
        inputs: &[ArgDef {
            name: "inputs",
            list: true,
        }],
        output: Some("sum"),
        infer: infer_binary,
    },
    OpDef {
        op_type: "NoOp",
        inputs: &[],
        output: None,
        infer: infer_none,
    },
];

fn lookup(op_type: &str) -> Option<&'static OpDef> {
    OPS.iter().find(|d| d.op_type == op_type)
}

fn infer_none(_: &NodeDef, _: &[&OutputSpec]) -> Result<Vec<OutputSpec>, Failure> {
    Ok(Vec::new())
}

fn infer_placeholder(def: &NodeDef, _: &[&OutputSpec]) -> Result<Vec<OutputSpec>, Failure> {
    let dtype = match def.attrs.get("dtype") {
        Some(Attr::Type(t)) => *t,
        _ => {
            return Err(Failure::invalid_argument(format!(
                "NodeDef missing attr 'dtype' from Op<name={}>",
                def.name
            )))
        }
    };
    let shape = match def.attrs.get("shape") {
        Some(Attr::Shape(s)) => s.clone(),
        _ => None,
    };
    Ok(vec![OutputSpec { dtype, shape }])
}

fn infer_const(def: &NodeDef, _: &[&OutputSpec]) -> Result<Vec<OutputSpec>, Failure> {
    let Some(Attr::Tensor(value)) = def.attrs.get("value") else {
        return Err(Failure::invalid_argument(format!(
            "NodeDef missing attr 'value' from Op<name={}>",
            def.name
        )));
    };

    if let Some(Attr::Type(t)) = def.attrs.get("dtype") {
        if *t != value.dtype {
            return Err(Failure::invalid_argument(format!(
                "Const '{}' declares dtype {} but holds {}",
                def.name,
                dtype_name(*t),
                dtype_name(value.dtype)
            )));
        }
    }

    Ok(vec![OutputSpec {
        dtype: value.dtype,
        shape: Some(value.dims.clone()),
    }])
}

fn infer_unary(_: &NodeDef, inputs: &[&OutputSpec]) -> Result<Vec<OutputSpec>, Failure> {
    Ok(vec![inputs[0].clone()])
}

fn infer_binary(def: &NodeDef, inputs: &[&OutputSpec]) -> Result<Vec<OutputSpec>, Failure> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(Failure::invalid_argument(format!(
            "{} '{}' needs at least one input",
            def.op_type, def.name
        )));
    };

    let mut spec = (*first).clone();
    for other in rest {
        if other.dtype != spec.dtype {
            return Err(Failure::invalid_argument(format!(
                "Inputs to operation {} of type {} must have the same dtype, got {} and {}",
                def.name,
                def.op_type,
                dtype_name(spec.dtype),
                dtype_name(other.dtype)
            )));
        }
        spec.shape = broadcast_shapes(spec.shape.as_deref(), other.shape.as_deref())?;
    }
    Ok(vec![spec])
}

/// Numpy-style broadcasting of two shapes, unknown when either rank is.
pub(crate) fn broadcast_shapes(
    a: Option<&[i64]>,
    b: Option<&[i64]>,
) -> Result<Option<Vec<i64>>, Failure> {
    let (Some(a), Some(b)) = (a, b) else {
        return Ok(None);
    };

    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let x = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let y = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (x, y) {
            _ if x == y => x,
            (1, _) => y,
            (_, 1) => x,
            (-1, _) => y,
            (_, -1) => x,
            _ => {
                return Err(Failure::invalid_argument(format!(
                    "Incompatible shapes: {:?} vs. {:?}",
                    a, b
                )))
            }
        };
    }
    Ok(Some(out))
}

/// Nodes of one graph in creation order, which is also a topological order.
#[derive(Debug, Default)]
pub(crate) struct GraphState {
    ops: Vec<*mut TF_Operation>,
    names: HashMap<String, usize>,
    pub(crate) sessions: usize,
    pub(crate) delete_requested: bool,
}

// The operations are owned by the state and immutable once added.
unsafe impl Send for GraphState {}

impl Drop for GraphState {
    fn drop(&mut self) {
        for op in self.ops.drain(..) {
            // SAFETY: every entry came from `Box::into_raw` in `add`
            unsafe { drop(Box::from_raw(op)) };
        }
    }
}

impl GraphState {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn op(&self, id: usize) -> &TF_Operation {
        // SAFETY: ids handed out by `add` index live entries
        unsafe { &*self.ops[id] }
    }

    pub fn op_ptr(&self, id: usize) -> *mut TF_Operation {
        self.ops[id]
    }

    pub fn by_name(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub fn spec(&self, e: Endpoint) -> &OutputSpec {
        &self.op(e.op).outputs[e.index]
    }

    pub fn id_of(&self, oper: *const TF_Operation) -> Result<usize, Failure> {
        if oper.is_null() {
            return Err(Failure::invalid_argument("null operation"));
        }

        // SAFETY: callers pass pointers obtained from a live graph
        let id = unsafe { (*oper).id };
        match self.ops.get(id) {
            Some(p) if std::ptr::eq(*p, oper) => Ok(id),
            _ => Err(Failure::invalid_argument(
                "operation does not belong to this graph",
            )),
        }
    }

    pub fn endpoint(&self, output: TF_Output) -> Result<Endpoint, Failure> {
        let op = self.id_of(output.oper)?;
        let outputs = self.op(op).outputs.len();
        if output.index < 0 || output.index as usize >= outputs {
            return Err(Failure::out_of_range(format!(
                "Node '{}' (type: '{}', num of outputs: {}) does not have output {}",
                self.op(op).name(),
                self.op(op).op_type(),
                outputs,
                output.index
            )));
        }
        Ok(Endpoint {
            op,
            index: output.index as usize,
        })
    }

    pub fn to_output(&self, e: Endpoint) -> TF_Output {
        TF_Output {
            oper: self.ops[e.op],
            index: e.index as c_int,
        }
    }

    /// Returns `base`, or `base_N` for the smallest free `N`.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.names.contains_key(base) {
            return base.to_owned();
        }

        (1..)
            .map(|i| format!("{}_{}", base, i))
            .find(|n| !self.names.contains_key(n))
            .unwrap_or_default()
    }

    pub fn add(&mut self, def: NodeDef) -> Result<usize, Failure> {
        if def.name.is_empty() {
            return Err(Failure::invalid_argument("Node name must not be empty"));
        }
        if self.names.contains_key(&def.name) {
            return Err(Failure::invalid_argument(format!(
                "Duplicate node name in graph: '{}'",
                def.name
            )));
        }

        let opdef = lookup(&def.op_type).ok_or_else(|| {
            Failure::not_found(format!(
                "Op type not registered '{}' in binary",
                def.op_type
            ))
        })?;

        if def.inputs.len() != opdef.inputs.len() {
            return Err(Failure::invalid_argument(format!(
                "Expected {} inputs for {} '{}', got {}",
                opdef.inputs.len(),
                def.op_type,
                def.name,
                def.inputs.len()
            )));
        }

        let mut inputs = Vec::new();
        let mut input_args = Vec::new();
        for (arg, given) in opdef.inputs.iter().zip(&def.inputs) {
            let list: &[Endpoint] = match (arg.list, given) {
                (false, InputArg::Single(e)) => std::slice::from_ref(e),
                (true, InputArg::List(l)) => l,
                _ => {
                    return Err(Failure::invalid_argument(format!(
                        "Input '{}' of {} '{}' expects {}",
                        arg.name,
                        def.op_type,
                        def.name,
                        if arg.list { "a list" } else { "a single tensor" }
                    )))
                }
            };
            for e in list {
                if e.op >= self.ops.len() || e.index >= self.op(e.op).outputs.len() {
                    return Err(Failure::out_of_range(format!(
                        "Input '{}' of '{}' refers to a missing output",
                        arg.name, def.name
                    )));
                }
            }
            inputs.extend_from_slice(list);
            input_args.push((arg.name, list.len()));
        }

        let specs: Vec<&OutputSpec> = inputs.iter().map(|e| self.spec(*e)).collect();
        let outputs = (opdef.infer)(&def, &specs)?;
        let output_args = opdef
            .output
            .map(|n| vec![(n, outputs.len())])
            .unwrap_or_default();

        let id = self.ops.len();
        let op = TF_Operation {
            id,
            name: to_cstring(&def.name)?,
            op_type: to_cstring(&def.op_type)?,
            device: to_cstring(&def.device)?,
            inputs,
            input_args,
            attrs: def.attrs,
            outputs,
            output_args,
        };

        self.ops.push(Box::into_raw(Box::new(op)));
        self.names.insert(def.name, id);
        Ok(id)
    }
}

fn to_cstring(s: &str) -> Result<CString, Failure> {
    CString::new(s).map_err(|e| Failure::invalid_argument(format!("{}", e)))
}

pub struct TF_Graph {
    state: Mutex<GraphState>,
}

impl TF_Graph {
    pub(crate) fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub unsafe fn TF_NewGraph() -> *mut TF_Graph {
    Box::into_raw(Box::new(TF_Graph {
        state: Mutex::new(GraphState::default()),
    }))
}

/// Destroys the graph, or defers it until the last session on it is deleted.
pub unsafe fn TF_DeleteGraph(graph: *mut TF_Graph) {
    let Some(g) = graph.as_ref() else {
        return;
    };

    {
        let mut state = g.lock();
        if state.sessions > 0 {
            state.delete_requested = true;
            return;
        }
    }
    drop(Box::from_raw(graph));
}

pub unsafe fn TF_GraphOperationByName(
    graph: *mut TF_Graph,
    oper_name: *const c_char,
) -> *mut TF_Operation {
    let Ok(name) = c_str(oper_name) else {
        return std::ptr::null_mut();
    };

    let state = (*graph).lock();
    state
        .by_name(name)
        .map_or(std::ptr::null_mut(), |id| state.op_ptr(id))
}

pub unsafe fn TF_GraphNextOperation(graph: *mut TF_Graph, pos: *mut usize) -> *mut TF_Operation {
    let state = (*graph).lock();
    if *pos >= state.len() {
        return std::ptr::null_mut();
    }

    let op = state.op_ptr(*pos);
    *pos += 1;
    op
}

pub unsafe fn TF_GraphGetTensorNumDims(
    graph: *mut TF_Graph,
    output: TF_Output,
    status: *mut TF_Status,
) -> c_int {
    report(status, || {
        let state = (*graph).lock();
        let e = state.endpoint(output)?;
        Ok(state
            .spec(e)
            .shape
            .as_ref()
            .map_or(-1, |s| s.len() as c_int))
    })
    .unwrap_or(-1)
}

pub unsafe fn TF_GraphGetTensorShape(
    graph: *mut TF_Graph,
    output: TF_Output,
    dims: *mut i64,
    num_dims: c_int,
    status: *mut TF_Status,
) {
    report(status, || {
        let state = (*graph).lock();
        let e = state.endpoint(output)?;
        let Some(shape) = &state.spec(e).shape else {
            return Err(Failure::invalid_argument("shape of tensor has unknown rank"));
        };

        if shape.len() != num_dims.max(0) as usize {
            return Err(Failure::invalid_argument(format!(
                "Expected rank is {} but actual rank is {}",
                num_dims,
                shape.len()
            )));
        }

        if !shape.is_empty() {
            std::slice::from_raw_parts_mut(dims, shape.len()).copy_from_slice(shape);
        }
        Ok(())
    });
}

pub unsafe fn TF_OperationName(oper: *mut TF_Operation) -> *const c_char {
    let oper = &*oper;
    oper.name.as_ptr()
}

pub unsafe fn TF_OperationOpType(oper: *mut TF_Operation) -> *const c_char {
    let oper = &*oper;
    oper.op_type.as_ptr()
}

pub unsafe fn TF_OperationDevice(oper: *mut TF_Operation) -> *const c_char {
    let oper = &*oper;
    oper.device.as_ptr()
}

pub unsafe fn TF_OperationNumOutputs(oper: *mut TF_Operation) -> c_int {
    let oper = &*oper;
    oper.outputs.len() as c_int
}

pub unsafe fn TF_OperationNumInputs(oper: *mut TF_Operation) -> c_int {
    let oper = &*oper;
    oper.inputs.len() as c_int
}

pub unsafe fn TF_OperationOutputType(oper_out: TF_Output) -> TF_DataType {
    let oper = &*oper_out.oper;
    oper.outputs
        .get(oper_out.index as usize)
        .map_or(0, |o| o.dtype)
}

pub unsafe fn TF_OperationOutputListLength(
    oper: *mut TF_Operation,
    arg_name: *const c_char,
    status: *mut TF_Status,
) -> c_int {
    report(status, || {
        let name = c_str(arg_name)?;
        let oper = &*oper;
        oper.output_args
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, len)| *len as c_int)
            .ok_or_else(|| Failure::invalid_argument(format!("Output arg '{}' not found", name)))
    })
    .unwrap_or(-1)
}

pub unsafe fn TF_OperationInputListLength(
    oper: *mut TF_Operation,
    arg_name: *const c_char,
    status: *mut TF_Status,
) -> c_int {
    report(status, || {
        let name = c_str(arg_name)?;
        let oper = &*oper;
        oper.input_args
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, len)| *len as c_int)
            .ok_or_else(|| Failure::invalid_argument(format!("Input arg '{}' not found", name)))
    })
    .unwrap_or(-1)
}

#[derive(Debug)]
enum DescInput {
    Single(TF_Output),
    List(Vec<TF_Output>),
}

/// An operation under construction.
#[derive(Debug)]
pub struct TF_OperationDescription {
    graph: *mut TF_Graph,
    def: NodeDef,
    inputs: Vec<DescInput>,
    failure: Option<Failure>,
}

impl TF_OperationDescription {
    fn fail(&mut self, failure: Failure) {
        self.failure.get_or_insert(failure);
    }

    unsafe fn set_attr(&mut self, attr_name: *const c_char, attr: Attr) {
        match c_str(attr_name) {
            Ok(name) => {
                self.def.attrs.insert(name.to_owned(), attr);
            }
            Err(f) => self.fail(f),
        }
    }
}

pub unsafe fn TF_NewOperation(
    graph: *mut TF_Graph,
    op_type: *const c_char,
    oper_name: *const c_char,
) -> *mut TF_OperationDescription {
    let mut desc = TF_OperationDescription {
        graph,
        def: NodeDef::default(),
        inputs: Vec::new(),
        failure: None,
    };

    match (c_str(op_type), c_str(oper_name)) {
        (Ok(t), Ok(n)) => desc.def = NodeDef::new(t, n),
        (Err(f), _) | (_, Err(f)) => desc.fail(f),
    }

    Box::into_raw(Box::new(desc))
}

pub unsafe fn TF_AddInput(desc: *mut TF_OperationDescription, input: TF_Output) {
    let desc = &mut *desc;
    desc.inputs.push(DescInput::Single(input));
}

pub unsafe fn TF_AddInputList(
    desc: *mut TF_OperationDescription,
    inputs: *const TF_Output,
    num_inputs: c_int,
) {
    let list = if inputs.is_null() || num_inputs <= 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(inputs, num_inputs as usize).to_vec()
    };
    let desc = &mut *desc;
    desc.inputs.push(DescInput::List(list));
}

pub unsafe fn TF_SetDevice(desc: *mut TF_OperationDescription, device: *const c_char) {
    let desc = &mut *desc;
    match c_str(device) {
        Ok(d) => desc.def.device = d.to_owned(),
        Err(f) => desc.fail(f),
    }
}

pub unsafe fn TF_SetAttrType(
    desc: *mut TF_OperationDescription,
    attr_name: *const c_char,
    value: TF_DataType,
) {
    (*desc).set_attr(attr_name, Attr::Type(value));
}

pub unsafe fn TF_SetAttrInt(desc: *mut TF_OperationDescription, attr_name: *const c_char, value: i64) {
    (*desc).set_attr(attr_name, Attr::Int(value));
}

pub unsafe fn TF_SetAttrShape(
    desc: *mut TF_OperationDescription,
    attr_name: *const c_char,
    dims: *const i64,
    num_dims: c_int,
) {
    let shape = match num_dims {
        n if n < 0 => None,
        0 => Some(Vec::new()),
        n => Some(std::slice::from_raw_parts(dims, n as usize).to_vec()),
    };
    (*desc).set_attr(attr_name, Attr::Shape(shape));
}

pub unsafe fn TF_SetAttrTensor(
    desc: *mut TF_OperationDescription,
    attr_name: *const c_char,
    value: *mut TF_Tensor,
    status: *mut TF_Status,
) {
    if let Some(v) = report(status, || Value::from_tensor(&*value)) {
        (*desc).set_attr(attr_name, Attr::Tensor(v));
    }
}

/// Adds the described operation to its graph, consuming the description.
pub unsafe fn TF_FinishOperation(
    desc: *mut TF_OperationDescription,
    status: *mut TF_Status,
) -> *mut TF_Operation {
    let TF_OperationDescription {
        graph,
        mut def,
        inputs,
        failure,
    } = *Box::from_raw(desc);

    report(status, || {
        if let Some(failure) = failure {
            return Err(failure);
        }

        let mut state = (*graph).lock();
        for input in &inputs {
            def.inputs.push(match input {
                DescInput::Single(o) => InputArg::Single(state.endpoint(*o)?),
                DescInput::List(l) => InputArg::List(
                    l.iter()
                        .map(|o| state.endpoint(*o))
                        .collect::<Result<_, _>>()?,
                ),
            });
        }

        let id = state.add(def)?;
        Ok(state.op_ptr(id))
    })
    .unwrap_or(std::ptr::null_mut())
}
