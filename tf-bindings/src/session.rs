// SPDX-License-Identifier: Apache-2.0

use crate::graph::GraphInner;
use crate::handle::NativeHandle;
use crate::{ffi, Buffer, Error, Graph, Handle, Operation, Output, Result, Status, Tensor};
use log::{debug, warn};
use std::ffi::c_int;
use std::ptr::{self, NonNull};
use std::sync::Arc;

define_component!(
    /// Wrapper for the `TF_SessionOptions` C object.
    #[derive(Debug)]
    pub SessionOptions,
    ffi::TF_SessionOptions,
    drop: TF_DeleteSessionOptions
);

impl SessionOptions {
    /// Creates new default `SessionOptions`.
    pub fn new() -> Result<Self> {
        unsafe { Self::from_ptr(ffi::TF_NewSessionOptions()) }
    }

    /// Sets the serialized `ConfigProto` to create sessions with.
    pub fn with_config(mut self, config: &[u8]) -> Result<Self> {
        let mut status = Status::new()?;
        unsafe {
            ffi::TF_SetConfig(
                self.as_mut_ptr(),
                config.as_ptr() as *const _,
                config.len(),
                status.as_mut_ptr(),
            )
        };
        status.check()?;
        Ok(self)
    }
}

/// Runs operations of a [`Graph`].
///
/// The session does not keep the graph alive: running it after the graph
/// was closed fails with [`Error::GraphClosed`].
#[derive(Debug)]
pub struct Session {
    handle: NativeHandle<ffi::TF_Session>,
    graph: Arc<GraphInner>,
}

impl Session {
    /// Creates a new `Session` over `graph`.
    pub fn new(graph: &Graph, options: &SessionOptions) -> Result<Self> {
        let mut status = Status::new()?;
        let ptr = {
            let g = graph.reference()?;
            unsafe { ffi::TF_NewSession(g.as_ptr(), options.as_ptr(), status.as_mut_ptr()) }
        };
        status.check()?;

        let ptr = NonNull::new(ptr).ok_or(Error::EmptyValue)?;
        debug!("Created session {:p}", ptr);
        Ok(Self::from_native(ptr, graph))
    }

    /// Takes ownership of an already created native session.
    pub(crate) fn from_native(ptr: NonNull<ffi::TF_Session>, graph: &Graph) -> Self {
        Session {
            handle: NativeHandle::new(ptr, || Error::SessionClosed),
            graph: graph.inner().clone(),
        }
    }

    /// Starts describing a single run of the session.
    pub fn runner(&self) -> Runner<'_> {
        Runner {
            session: self,
            inputs: Vec::new(),
            outputs: Vec::new(),
            targets: Vec::new(),
            run_options: None,
        }
    }

    /// Closes and deletes the native session.
    ///
    /// Calls after the first are no-ops.
    pub fn close(&self) -> Result<()> {
        self.handle.close(|ptr| {
            let mut status = Status::new()?;
            unsafe { ffi::TF_CloseSession(ptr.as_ptr(), status.as_mut_ptr()) };
            let closed = status.check();

            unsafe { ffi::TF_DeleteSession(ptr.as_ptr(), status.as_mut_ptr()) };
            debug!("Deleted session {:p}", ptr);
            closed.and(status.check())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Could not close session: {}", e);
        }
    }
}

/// Collects the feeds, fetches and targets of a single [`Session`] run.
#[derive(Debug)]
pub struct Runner<'a> {
    session: &'a Session,
    inputs: Vec<(Output, &'a Tensor)>,
    outputs: Vec<Output>,
    targets: Vec<Operation>,
    run_options: Option<Vec<u8>>,
}

impl<'a> Runner<'a> {
    /// Feeds `tensor` in place of `output`.
    pub fn feed(mut self, output: &Output, tensor: &'a Tensor) -> Self {
        self.inputs.push((output.clone(), tensor));
        self
    }

    /// Requests the value of `output`.
    pub fn fetch(mut self, output: &Output) -> Self {
        self.outputs.push(output.clone());
        self
    }

    /// Runs `operation` without fetching anything from it.
    pub fn add_target(mut self, operation: &Operation) -> Self {
        self.targets.push(operation.clone());
        self
    }

    /// Sets the serialized `RunOptions` proto.
    pub fn with_run_options(mut self, run_options: &[u8]) -> Self {
        self.run_options = Some(run_options.to_vec());
        self
    }

    /// Runs the session, returning the fetched tensors in request order.
    pub fn run(self) -> Result<Vec<Tensor>> {
        self.run_inner(None)
    }

    /// Like [`run`](Self::run), also returning the serialized `RunMetadata`.
    pub fn run_and_fetch_metadata(self) -> Result<(Vec<Tensor>, Vec<u8>)> {
        let mut metadata = Buffer::new()?;
        let outputs = self.run_inner(Some(&mut metadata))?;
        Ok((outputs, metadata.to_vec()))
    }

    fn run_inner(&self, metadata: Option<&mut Buffer>) -> Result<Vec<Tensor>> {
        let session = self.session.handle.reference()?;
        let graph = self.session.graph.reference()?;

        let feeds: Vec<Output> = self.inputs.iter().map(|(o, _)| o.clone()).collect();
        let inputs = feeds
            .iter()
            .chain(&self.outputs)
            .map(|o| o.to_native(&self.session.graph))
            .collect::<Result<Vec<_>>>()?;
        let (inputs, outputs) = inputs.split_at(feeds.len());
        let input_values: Vec<*mut ffi::TF_Tensor> = self
            .inputs
            .iter()
            .map(|(_, t)| t.as_ptr() as *mut _)
            .collect();

        let mut targets = Vec::with_capacity(self.targets.len());
        for t in &self.targets {
            if !t.belongs_to(&self.session.graph) {
                return Err(Error::InvalidArgument(format!(
                    "Target {} does not belong to the session's graph",
                    t
                )));
            }
            targets.push(t.as_native() as *const ffi::TF_Operation);
        }

        let run_options = self
            .run_options
            .as_deref()
            .map(Buffer::from_bytes)
            .transpose()?;
        let mut output_values: Vec<*mut ffi::TF_Tensor> = vec![ptr::null_mut(); outputs.len()];

        let mut status = Status::new()?;
        unsafe {
            ffi::TF_SessionRun(
                session.as_ptr(),
                run_options.as_ref().map_or(ptr::null(), |b| b.as_ptr()),
                inputs.as_ptr(),
                input_values.as_ptr(),
                inputs.len() as c_int,
                outputs.as_ptr(),
                output_values.as_mut_ptr(),
                outputs.len() as c_int,
                targets.as_ptr(),
                targets.len() as c_int,
                metadata.map_or(ptr::null_mut(), |m| m.as_mut_ptr()),
                status.as_mut_ptr(),
            )
        };
        drop(graph);
        status.check()?;

        output_values
            .into_iter()
            .map(|t| unsafe { Tensor::from_ptr(t) })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    #[test]
    fn feed_and_fetch() {
        let graph = Graph::new().unwrap();
        let x = graph
            .new_operation("Placeholder", "x")
            .unwrap()
            .set_attr_type("dtype", DataType::Int32)
            .unwrap()
            .finish()
            .unwrap();
        let y = graph
            .new_operation("Square", "y")
            .unwrap()
            .add_input(&x.output(0))
            .unwrap()
            .finish()
            .unwrap();

        let session = Session::new(&graph, &SessionOptions::new().unwrap()).unwrap();
        let input = Tensor::new(&[3], &[1i32, -2, 3]).unwrap();
        let result = session
            .runner()
            .feed(&x.output(0), &input)
            .fetch(&y.output(0))
            .run()
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_slice::<i32>().unwrap(), &[1, 4, 9]);
    }

    #[test]
    fn closed_session() {
        let graph = Graph::new().unwrap();
        let session = Session::new(&graph, &SessionOptions::new().unwrap()).unwrap();

        session.close().unwrap();
        session.close().unwrap();
        assert!(session.is_closed());
        assert!(matches!(session.runner().run(), Err(Error::SessionClosed)));
    }

    #[test]
    fn session_outlives_graph_close() {
        let graph = Graph::new().unwrap();
        let session = Session::new(&graph, &SessionOptions::new().unwrap()).unwrap();

        graph.close().unwrap();
        assert!(matches!(session.runner().run(), Err(Error::GraphClosed)));
    }

    #[test]
    fn run_metadata_is_returned() {
        let graph = Graph::new().unwrap();
        let session = Session::new(&graph, &SessionOptions::new().unwrap()).unwrap();
        let (outputs, metadata) = session
            .runner()
            .with_run_options(&[])
            .run_and_fetch_metadata()
            .unwrap();
        assert!(outputs.is_empty());
        assert!(metadata.is_empty());
    }
}
