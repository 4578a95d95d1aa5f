// SPDX-License-Identifier: Apache-2.0

use super::eval::Evaluator;
use super::status::{report, TF_Status};
use super::text::{parse_graph, parse_saved_model};
use super::*;
use std::ffi::{c_char, c_int, c_void};
use std::path::Path;

/// File holding the text form of a saved model inside an export directory.
pub(crate) const SAVED_MODEL_FILE: &str = "saved_model.txt";

#[derive(Debug, Default)]
pub struct TF_SessionOptions {
    config: Vec<u8>,
}

pub unsafe fn TF_NewSessionOptions() -> *mut TF_SessionOptions {
    Box::into_raw(Box::default())
}

pub unsafe fn TF_DeleteSessionOptions(options: *mut TF_SessionOptions) {
    if !options.is_null() {
        drop(Box::from_raw(options));
    }
}

pub unsafe fn TF_SetConfig(
    options: *mut TF_SessionOptions,
    proto: *const c_void,
    proto_len: usize,
    status: *mut TF_Status,
) {
    report(status, || {
        let options = options
            .as_mut()
            .ok_or_else(|| Failure::invalid_argument("null session options"))?;
        options.config = if proto.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(proto as *const u8, proto_len).to_vec()
        };
        Ok(())
    });
}

#[derive(Debug)]
pub struct TF_Session {
    graph: *mut TF_Graph,
    closed: bool,
}

unsafe fn attach(graph: *mut TF_Graph) -> *mut TF_Session {
    (*graph).lock().sessions += 1;
    Box::into_raw(Box::new(TF_Session {
        graph,
        closed: false,
    }))
}

pub unsafe fn TF_NewSession(
    graph: *mut TF_Graph,
    _opts: *const TF_SessionOptions,
    status: *mut TF_Status,
) -> *mut TF_Session {
    report(status, || {
        if graph.is_null() {
            return Err(Failure::invalid_argument("null graph"));
        }
        Ok(attach(graph))
    })
    .unwrap_or(std::ptr::null_mut())
}

pub unsafe fn TF_CloseSession(session: *mut TF_Session, status: *mut TF_Status) {
    report(status, || {
        if let Some(s) = session.as_mut() {
            s.closed = true;
        }
        Ok(())
    });
}

/// Deletes the session, completing a deferred delete of its graph.
pub unsafe fn TF_DeleteSession(session: *mut TF_Session, status: *mut TF_Status) {
    report(status, || Ok(()));
    if session.is_null() {
        return;
    }

    let session = Box::from_raw(session);
    let graph = session.graph;
    let release = {
        let mut state = (*graph).lock();
        state.sessions = state.sessions.saturating_sub(1);
        state.sessions == 0 && state.delete_requested
    };
    if release {
        drop(Box::from_raw(graph));
    }
}

#[allow(clippy::too_many_arguments)]
pub unsafe fn TF_SessionRun(
    session: *mut TF_Session,
    _run_options: *const TF_Buffer,
    inputs: *const TF_Output,
    input_values: *const *mut TF_Tensor,
    ninputs: c_int,
    outputs: *const TF_Output,
    output_values: *mut *mut TF_Tensor,
    noutputs: c_int,
    target_opers: *const *const TF_Operation,
    ntargets: c_int,
    run_metadata: *mut TF_Buffer,
    status: *mut TF_Status,
) {
    report(status, || {
        let session = &*session;
        if session.closed {
            return Err(Failure::failed_precondition(
                "Session has been closed.",
            ));
        }

        let state = (*session.graph).lock();
        let mut feeds = Vec::new();
        for i in 0..ninputs.max(0) as usize {
            let e = state.endpoint(*inputs.add(i))?;
            feeds.push((e, Value::from_tensor(&**input_values.add(i))?));
        }

        let mut eval = Evaluator::new(&state, feeds)?;
        let mut results = Vec::new();
        for i in 0..noutputs.max(0) as usize {
            let e = state.endpoint(*outputs.add(i))?;
            results.push(eval.output(e)?);
        }
        for i in 0..ntargets.max(0) as usize {
            let id = state.id_of(*target_opers.add(i))?;
            eval.run(id)?;
        }

        // Tensors are only handed out once every fetch succeeded.
        let tensors = results
            .into_iter()
            .map(Value::into_tensor)
            .collect::<Result<Vec<_>, _>>()?;
        for (i, t) in tensors.into_iter().enumerate() {
            *output_values.add(i) = t;
        }

        // Nothing is traced, which serializes to an empty RunMetadata.
        fill_buffer(run_metadata, Vec::new());
        Ok(())
    });
}

#[allow(clippy::too_many_arguments)]
pub unsafe fn TF_LoadSessionFromSavedModel(
    _session_options: *const TF_SessionOptions,
    _run_options: *const TF_Buffer,
    export_dir: *const c_char,
    tags: *const *const c_char,
    tags_len: c_int,
    graph: *mut TF_Graph,
    meta_graph_def: *mut TF_Buffer,
    status: *mut TF_Status,
) -> *mut TF_Session {
    report(status, || {
        let export_dir = c_str(export_dir)?;
        let tags = (0..tags_len.max(0) as usize)
            .map(|i| c_str(*tags.add(i)))
            .collect::<Result<Vec<_>, _>>()?;

        let path = Path::new(export_dir).join(SAVED_MODEL_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            Failure::not_found(format!(
                "Could not find SavedModel at supplied export directory path: {} ({})",
                export_dir, e
            ))
        })?;

        let meta = parse_saved_model(&text)?
            .into_iter()
            .find(|m| m.matches(&tags))
            .ok_or_else(|| {
                Failure::not_found(format!(
                    "Could not find meta graph def matching supplied tags: {{ {} }}",
                    tags.join(" ")
                ))
            })?;

        parse_graph(&meta.body, &mut (*graph).lock())?;
        fill_buffer(meta_graph_def, meta.body.into_bytes());
        Ok(attach(graph))
    })
    .unwrap_or(std::ptr::null_mut())
}
