// SPDX-License-Identifier: Apache-2.0

use super::graph::{broadcast_shapes, Attr, Endpoint, GraphState};
use super::tensor::{num_elements, Value};
use super::*;
use std::collections::HashMap;

/// Demand-driven evaluation of a graph, memoized per operation.
pub(crate) struct Evaluator<'a> {
    state: &'a GraphState,
    feeds: HashMap<Endpoint, Value>,
    cache: HashMap<usize, Vec<Value>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        state: &'a GraphState,
        feeds: impl IntoIterator<Item = (Endpoint, Value)>,
    ) -> Result<Self, Failure> {
        let feeds: HashMap<_, _> = feeds.into_iter().collect();
        for (e, v) in &feeds {
            check_feed(state, *e, v)?;
        }

        Ok(Evaluator {
            state,
            feeds,
            cache: HashMap::new(),
        })
    }

    pub fn output(&mut self, e: Endpoint) -> Result<Value, Failure> {
        if let Some(v) = self.feeds.get(&e) {
            return Ok(v.clone());
        }

        self.run(e.op)?;
        Ok(self.cache[&e.op][e.index].clone())
    }

    pub fn run(&mut self, id: usize) -> Result<(), Failure> {
        if self.cache.contains_key(&id) {
            return Ok(());
        }

        let state = self.state;
        let op = state.op(id);
        let inputs = op
            .inputs
            .iter()
            .map(|e| self.output(*e))
            .collect::<Result<Vec<_>, _>>()?;

        let dtype = op.outputs.first().map_or(TF_FLOAT, |o| o.dtype);
        let outputs = match op.op_type() {
            "Placeholder" => {
                return Err(Failure::invalid_argument(format!(
                    "You must feed a value for placeholder tensor '{}' with dtype {}",
                    op.name(),
                    dtype_name(dtype)
                )))
            }
            "Const" => match op.attrs.get("value") {
                Some(Attr::Tensor(v)) => vec![v.clone()],
                _ => return Err(Failure::failed_precondition("Const without value")),
            },
            "NoOp" => Vec::new(),
            "Identity" => vec![inputs[0].clone()],
            "Square" => vec![map(&inputs[0], |x| x * x)?],
            "OnesLike" => vec![map(&inputs[0], |_| 1.0)?],
            "ZerosLike" => vec![map(&inputs[0], |_| 0.0)?],
            "Mul" => vec![zip(&inputs[0], &inputs[1], |x, y| x * y)?],
            "AddV2" => vec![zip(&inputs[0], &inputs[1], |x, y| x + y)?],
            "AddN" => {
                let mut it = inputs.iter();
                let mut sum = it
                    .next()
                    .cloned()
                    .ok_or_else(|| Failure::invalid_argument("AddN without inputs"))?;
                for v in it {
                    sum = zip(&sum, v, |x, y| x + y)?;
                }
                vec![sum]
            }
            other => {
                return Err(Failure::unimplemented(format!(
                    "No kernel registered for op '{}'",
                    other
                )))
            }
        };

        self.cache.insert(id, outputs);
        Ok(())
    }
}

fn check_feed(state: &GraphState, e: Endpoint, v: &Value) -> Result<(), Failure> {
    let spec = state.spec(e);
    let name = state.op(e.op).name();

    if spec.dtype != v.dtype {
        return Err(Failure::invalid_argument(format!(
            "Fed tensor {}:{} has dtype {}, expected {}",
            name,
            e.index,
            dtype_name(v.dtype),
            dtype_name(spec.dtype)
        )));
    }

    if let Some(shape) = &spec.shape {
        let compatible = shape.len() == v.dims.len()
            && shape.iter().zip(&v.dims).all(|(s, d)| *s < 0 || s == d);
        if !compatible {
            return Err(Failure::invalid_argument(format!(
                "Shape {:?} of fed tensor {}:{} is incompatible with {:?}",
                v.dims, name, e.index, shape
            )));
        }
    }
    Ok(())
}

fn map(v: &Value, f: impl Fn(f64) -> f64) -> Result<Value, Failure> {
    let data = v.data.iter().map(|x| f(*x)).collect();
    Ok(Value::numeric(v.dtype, v.dims.clone(), data))
}

fn zip(a: &Value, b: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, Failure> {
    let dims = broadcast_shapes(Some(&a.dims), Some(&b.dims))?.unwrap_or_default();
    let (x, y) = (&a.data, &b.data);

    let data = (0..num_elements(&dims))
        .map(|i| f(x[source(i, &dims, &a.dims)], y[source(i, &dims, &b.dims)]))
        .collect();
    Ok(Value::numeric(a.dtype, dims, data))
}

/// Maps a flat index of the broadcast result back into an operand.
fn source(flat: usize, out: &[i64], dims: &[i64]) -> usize {
    let offset = out.len() - dims.len();
    let mut rem = flat;
    let mut idx = 0;
    let mut stride = 1;

    for k in (0..out.len()).rev() {
        let extent = out[k] as usize;
        let coord = rem % extent;
        rem /= extent;

        if k >= offset {
            let d = dims[k - offset] as usize;
            if d != 1 {
                idx += coord * stride;
            }
            stride *= d;
        }
    }
    idx
}
