// SPDX-License-Identifier: Apache-2.0

//! Symbolic gradients: `dy[i] = sum_j d(y_j)/d(x_i)`, added to the graph as
//! ordinary nodes under a common name prefix.

use super::graph::{Attr, Endpoint, GraphState, NodeDef};
use super::status::{report, TF_Status};
use super::*;
use std::collections::HashMap;
use std::ffi::{c_char, c_int};

pub unsafe fn TF_AddGradientsWithPrefix(
    g: *mut TF_Graph,
    prefix: *const c_char,
    y: *mut TF_Output,
    ny: c_int,
    x: *mut TF_Output,
    nx: c_int,
    dx: *mut TF_Output,
    status: *mut TF_Status,
    dy: *mut TF_Output,
) {
    report(status, || {
        let prefix = if prefix.is_null() {
            None
        } else {
            Some(c_str(prefix)?)
        };

        let mut state = (*g).lock();
        let ys = endpoints(&state, y, ny)?;
        let xs = endpoints(&state, x, nx)?;
        let dxs = if dx.is_null() {
            None
        } else {
            Some(endpoints(&state, dx, ny)?)
        };

        let grads = add_gradients(&mut state, prefix, &ys, &xs, dxs.as_deref())?;
        for (i, e) in grads.into_iter().enumerate() {
            *dy.add(i) = state.to_output(e);
        }
        Ok(())
    });
}

unsafe fn endpoints(
    state: &GraphState,
    outputs: *const TF_Output,
    n: c_int,
) -> Result<Vec<Endpoint>, Failure> {
    if outputs.is_null() || n <= 0 {
        return Ok(Vec::new());
    }

    std::slice::from_raw_parts(outputs, n as usize)
        .iter()
        .map(|o| state.endpoint(*o))
        .collect()
}

fn conflicting<'a>(state: &'a GraphState, prefix: &str) -> Option<&'a str> {
    let scoped = format!("{}/", prefix);
    state
        .names()
        .find(|n| *n == prefix || n.starts_with(&scoped))
}

fn resolve_prefix(state: &GraphState, prefix: Option<&str>) -> Result<String, Failure> {
    match prefix {
        Some(p) => match conflicting(state, p) {
            Some(existing) => Err(Failure::invalid_argument(format!(
                "prefix [{}] conflicts with existing node in the graph named [{}]",
                p, existing
            ))),
            None => Ok(p.to_owned()),
        },
        None => Ok(std::iter::once("gradients".to_owned())
            .chain((1..).map(|i| format!("gradients_{}", i)))
            .find(|p| conflicting(state, p).is_none())
            .unwrap_or_default()),
    }
}

struct Builder<'a> {
    state: &'a mut GraphState,
    prefix: String,
}

impl Builder<'_> {
    fn add(&mut self, scope: &str, def: NodeDef) -> Result<Endpoint, Failure> {
        let base = if scope.is_empty() {
            format!("{}/{}", self.prefix, def.name)
        } else {
            format!("{}/{}/{}", self.prefix, scope, def.name)
        };
        let name = self.state.unique_name(&base);
        let op = self.state.add(NodeDef { name, ..def })?;
        Ok(Endpoint { op, index: 0 })
    }

    fn unary(&mut self, op_type: &str, x: Endpoint) -> Result<Endpoint, Failure> {
        self.add("", NodeDef::new(op_type, op_type).input(x))
    }

    fn mul(&mut self, scope: &str, x: Endpoint, y: Endpoint) -> Result<Endpoint, Failure> {
        self.add(scope, NodeDef::new("Mul", "Mul").input(x).input(y))
    }

    fn sum(&mut self, mut grads: Vec<Endpoint>) -> Result<Endpoint, Failure> {
        if grads.len() == 1 {
            return Ok(grads.remove(0));
        }
        self.add("", NodeDef::new("AddN", "AddN").input_list(grads))
    }

    /// Gradient contributions of `grad` to each input of `op`.
    fn backprop(
        &mut self,
        op: usize,
        grad: Endpoint,
        wanted: &[bool],
    ) -> Result<Vec<(Endpoint, Endpoint)>, Failure> {
        let node = self.state.op(op);
        let inputs = node.inputs.clone();
        let scope = format!("{}_grad", node.name());
        let op_type = node.op_type().to_owned();
        let dtype = node.outputs[0].dtype;

        let mut out = Vec::new();
        match op_type.as_str() {
            "Identity" | "AddV2" | "AddN" => {
                for input in inputs.iter().filter(|e| wanted[e.op]) {
                    out.push((*input, grad));
                }
            }
            "Square" if wanted[inputs[0].op] => {
                let two = self.add(
                    &scope,
                    NodeDef::new("Const", "Const")
                        .attr("dtype", Attr::Type(dtype))
                        .attr("value", Attr::Tensor(Value::scalar(dtype, 2.0))),
                )?;
                let twice = self.mul(&scope, inputs[0], two)?;
                out.push((inputs[0], self.mul(&scope, grad, twice)?));
            }
            "Mul" => {
                let (x, y) = (inputs[0], inputs[1]);
                if wanted[x.op] {
                    out.push((x, self.mul(&scope, grad, y)?));
                }
                if wanted[y.op] {
                    out.push((y, self.mul(&scope, x, grad)?));
                }
            }
            _ => {}
        }
        Ok(out)
    }
}

pub(crate) fn add_gradients(
    state: &mut GraphState,
    prefix: Option<&str>,
    ys: &[Endpoint],
    xs: &[Endpoint],
    dxs: Option<&[Endpoint]>,
) -> Result<Vec<Endpoint>, Failure> {
    let prefix = resolve_prefix(state, prefix)?;
    let n = state.len();

    if let Some(dxs) = dxs {
        for (y, dx) in ys.iter().zip(dxs) {
            if state.spec(*y).dtype != state.spec(*dx).dtype {
                return Err(Failure::invalid_argument(format!(
                    "Gradient seed for '{}' has dtype {}, expected {}",
                    state.op(y.op).name(),
                    dtype_name(state.spec(*dx).dtype),
                    dtype_name(state.spec(*y).dtype)
                )));
            }
        }
    }

    // Ops both downstream of some x and upstream of some y.
    let mut reach = vec![false; n];
    for x in xs {
        reach[x.op] = true;
    }
    for id in 0..n {
        if !reach[id] && state.op(id).inputs.iter().any(|e| reach[e.op]) {
            reach[id] = true;
        }
    }

    let mut upstream = vec![false; n];
    for y in ys {
        upstream[y.op] = true;
    }
    for id in (0..n).rev() {
        if upstream[id] {
            for e in &state.op(id).inputs {
                upstream[e.op] = true;
            }
        }
    }

    let wanted: Vec<bool> = reach.iter().zip(&upstream).map(|(a, b)| *a && *b).collect();

    let mut builder = Builder { state, prefix };
    let mut pending: HashMap<Endpoint, Vec<Endpoint>> = HashMap::new();
    for (i, y) in ys.iter().enumerate() {
        let seed = match dxs {
            Some(dxs) => dxs[i],
            None => builder.unary("OnesLike", *y)?,
        };
        pending.entry(*y).or_default().push(seed);
    }

    let mut done: HashMap<Endpoint, Endpoint> = HashMap::new();
    for id in (0..n).rev().filter(|id| wanted[*id]) {
        let out = Endpoint { op: id, index: 0 };
        let Some(grads) = pending.remove(&out) else {
            continue;
        };

        let grad = builder.sum(grads)?;
        done.insert(out, grad);
        for (input, contribution) in builder.backprop(id, grad, &wanted)? {
            pending.entry(input).or_default().push(contribution);
        }
    }

    xs.iter()
        .map(|x| match done.get(x) {
            Some(g) => Ok(*g),
            None => builder.unary("ZerosLike", *x),
        })
        .collect()
}
