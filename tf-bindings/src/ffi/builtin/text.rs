// SPDX-License-Identifier: Apache-2.0

//! Line-oriented text form of graphs, saved models and lite models.
//!
//! Each node is a single line, declared after its inputs:
//!
//! ```text
//! # comment
//! x = Placeholder() dtype=float shape=[1,2]
//! two = Const() value=2.0
//! y = Mul(x, two)
//! s = AddN([x, y:0])
//! ```
//!
//! A saved model groups graphs under `[tag, tag]` headers. A lite model starts
//! with the `TFLB` magic line and names its signature with `inputs:` and
//! `outputs:` lines.

use super::graph::{Attr, Endpoint, GraphState, InputArg, NodeDef};
use super::tensor::{num_elements, Value};
use super::*;

pub(crate) const LITE_MAGIC: &str = "TFLB";

fn syntax(line: usize, message: impl std::fmt::Display) -> Failure {
    Failure::invalid_argument(format!("line {}: {}", line, message))
}

/// Splits `s` on `sep` outside of brackets.
fn split_top(s: &str, sep: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            c if depth == 0 && sep(c) => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or_default().trim()
}

/// Resolves `name` or `name:index` against the nodes defined so far.
pub(crate) fn resolve(state: &GraphState, reference: &str) -> Result<Endpoint, Failure> {
    let (name, index) = match reference.rsplit_once(':') {
        Some((n, i)) => (
            n,
            i.parse::<usize>()
                .map_err(|_| Failure::invalid_argument(format!("bad output index in '{}'", reference)))?,
        ),
        None => (reference, 0),
    };

    let op = state
        .by_name(name)
        .ok_or_else(|| Failure::not_found(format!("node '{}' is not defined", name)))?;
    if index >= state.op(op).outputs.len() {
        return Err(Failure::out_of_range(format!(
            "node '{}' has no output {}",
            name, index
        )));
    }
    Ok(Endpoint { op, index })
}

fn parse_list(raw: &str) -> Option<Vec<&str>> {
    let inner = raw.strip_prefix('[')?.strip_suffix(']')?;
    Some(split_top(inner, |c| c == ','))
}

fn parse_shape(raw: &str) -> Option<Option<Vec<i64>>> {
    if raw == "?" {
        return Some(None);
    }
    parse_list(raw)?
        .into_iter()
        .map(|d| if d == "?" { Some(-1) } else { d.parse().ok() })
        .collect::<Option<Vec<i64>>>()
        .map(Some)
}

/// Flattens a possibly nested list of numbers, returning the values and
/// the dimensions implied by the nesting.
fn parse_values(raw: &str) -> Option<(Vec<f64>, Vec<i64>)> {
    if !raw.starts_with('[') {
        let v = match raw {
            "true" => 1.0,
            "false" => 0.0,
            _ => raw.parse().ok()?,
        };
        return Some((vec![v], Vec::new()));
    }

    let items = parse_list(raw)?;
    let mut values = Vec::new();
    let mut inner_dims: Option<Vec<i64>> = None;
    for item in &items {
        let (v, d) = parse_values(item)?;
        match &inner_dims {
            Some(existing) if *existing != d => return None,
            _ => inner_dims = Some(d),
        }
        values.extend(v);
    }

    let mut dims = vec![items.len() as i64];
    dims.extend(inner_dims.unwrap_or_default());
    Some((values, dims))
}

fn parse_node(state: &GraphState, lineno: usize, line: &str) -> Result<NodeDef, Failure> {
    let (name, rest) = line
        .split_once('=')
        .ok_or_else(|| syntax(lineno, "expected `name = Op(...)`"))?;
    let name = name.trim();

    let open = rest.find('(').ok_or_else(|| syntax(lineno, "missing `(`"))?;
    let close = rest.find(')').ok_or_else(|| syntax(lineno, "missing `)`"))?;
    if close < open {
        return Err(syntax(lineno, "mismatched parentheses"));
    }

    let op_type = rest[..open].trim();
    let mut def = NodeDef::new(op_type, name);

    for arg in split_top(&rest[open + 1..close], |c| c == ',') {
        let input = match parse_list(arg) {
            Some(list) => InputArg::List(
                list.into_iter()
                    .map(|r| resolve(state, r))
                    .collect::<Result<_, _>>()?,
            ),
            None => InputArg::Single(resolve(state, arg)?),
        };
        def.inputs.push(input);
    }

    let mut value = None;
    for token in split_top(&rest[close + 1..], char::is_whitespace) {
        let (key, raw) = token
            .split_once('=')
            .ok_or_else(|| syntax(lineno, format!("expected `key=value`, got `{}`", token)))?;

        let attr = match key {
            "dtype" | "T" => Attr::Type(
                dtype_from_name(raw)
                    .ok_or_else(|| syntax(lineno, format!("unknown dtype `{}`", raw)))?,
            ),
            "shape" => Attr::Shape(
                parse_shape(raw).ok_or_else(|| syntax(lineno, format!("bad shape `{}`", raw)))?,
            ),
            "value" => {
                value = Some(
                    parse_values(raw)
                        .ok_or_else(|| syntax(lineno, format!("bad value `{}`", raw)))?,
                );
                continue;
            }
            _ => Attr::Int(
                raw.parse()
                    .map_err(|_| syntax(lineno, format!("bad integer attribute `{}`", token)))?,
            ),
        };
        def.attrs.insert(key.to_owned(), attr);
    }

    if let Some((values, mut dims)) = value {
        let dtype = match def.attrs.get("dtype") {
            Some(Attr::Type(t)) => *t,
            _ => TF_FLOAT,
        };
        if let Some(Attr::Shape(Some(shape))) = def.attrs.remove("shape") {
            dims = shape;
        }
        if num_elements(&dims) != values.len() {
            return Err(syntax(
                lineno,
                format!("{} values do not fill shape {:?}", values.len(), dims),
            ));
        }
        def.attrs
            .insert("value".to_owned(), Attr::Tensor(Value::numeric(dtype, dims, values)));
    }

    Ok(def)
}

/// Adds every node line of `text` to `state`.
pub(crate) fn parse_graph(text: &str, state: &mut GraphState) -> Result<(), Failure> {
    parse_graph_with(text, state, |_| {})
}

/// Like [`parse_graph`], letting `adjust` rewrite each node before it is added.
pub(crate) fn parse_graph_with(
    text: &str,
    state: &mut GraphState,
    mut adjust: impl FnMut(&mut NodeDef),
) -> Result<(), Failure> {
    for (i, line) in text.lines().enumerate() {
        let line = strip_comment(line);
        if line.is_empty() {
            continue;
        }

        let mut def = parse_node(state, i + 1, line)?;
        adjust(&mut def);
        state.add(def)?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MetaGraphText {
    pub tags: Vec<String>,
    pub body: String,
}

impl MetaGraphText {
    pub fn matches(&self, tags: &[&str]) -> bool {
        self.tags.len() == tags.len() && tags.iter().all(|t| self.tags.iter().any(|m| m == t))
    }
}

pub(crate) fn parse_saved_model(text: &str) -> Result<Vec<MetaGraphText>, Failure> {
    let mut graphs: Vec<MetaGraphText> = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let trimmed = strip_comment(line);
        if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            let mut tags: Vec<String> = split_top(header, |c| c == ',')
                .into_iter()
                .map(str::to_owned)
                .collect();
            tags.dedup();
            graphs.push(MetaGraphText {
                tags,
                body: String::new(),
            });
            continue;
        }

        match graphs.last_mut() {
            Some(g) => {
                g.body.push_str(line);
                g.body.push('\n');
            }
            None if trimmed.is_empty() => {}
            None => return Err(syntax(i + 1, "node defined before any `[tags]` header")),
        }
    }

    Ok(graphs)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LiteModelText {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub graph: String,
}

pub(crate) fn parse_lite_model(bytes: &[u8]) -> Result<LiteModelText, Failure> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Failure::invalid_argument(format!("model is not valid UTF-8: {}", e)))?;

    let mut lines = text.lines();
    if lines.next().map(str::trim) != Some(LITE_MAGIC) {
        return Err(Failure::invalid_argument(format!(
            "model does not start with the `{}` identifier",
            LITE_MAGIC
        )));
    }

    let mut model = LiteModelText {
        inputs: Vec::new(),
        outputs: Vec::new(),
        graph: String::new(),
    };
    let names = |list: &str| -> Vec<String> {
        split_top(list, |c| c == ',')
            .into_iter()
            .map(str::to_owned)
            .collect()
    };

    for line in lines {
        let trimmed = strip_comment(line);
        if let Some(list) = trimmed.strip_prefix("inputs:") {
            model.inputs = names(list);
        } else if let Some(list) = trimmed.strip_prefix("outputs:") {
            model.outputs = names(list);
        } else {
            model.graph.push_str(line);
            model.graph.push('\n');
        }
    }

    Ok(model)
}
