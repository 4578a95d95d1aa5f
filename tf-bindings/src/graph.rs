// SPDX-License-Identifier: Apache-2.0

use crate::handle::{NativeHandle, Reference};
use crate::operation::{Operation, OperationBuilder, Output};
use crate::{cstring, ffi, Error, Handle, Result, Status};
use log::{debug, warn};
use std::ffi::c_int;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// The native graph shared by a [`Graph`] and the values derived from it.
#[derive(Debug)]
pub(crate) struct GraphInner {
    handle: NativeHandle<ffi::TF_Graph>,
}

impl GraphInner {
    pub(crate) fn reference(&self) -> Result<Reference<'_, ffi::TF_Graph>> {
        self.handle.reference()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

/// A computation graph owned by the native runtime.
///
/// Operations and outputs taken from the graph keep a back-reference to it
/// and fail with [`Error::GraphClosed`] once it is closed. Dropping the graph
/// closes it.
#[derive(Debug)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    /// Creates a new empty `Graph`.
    pub fn new() -> Result<Self> {
        let ptr = NonNull::new(unsafe { ffi::TF_NewGraph() }).ok_or(Error::EmptyValue)?;
        debug!("Created graph {:p}", ptr);
        Ok(Self::from_native(ptr))
    }

    /// Takes ownership of an already created native graph.
    pub(crate) fn from_native(ptr: NonNull<ffi::TF_Graph>) -> Self {
        Graph {
            inner: Arc::new(GraphInner {
                handle: NativeHandle::new(ptr, || Error::GraphClosed),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<GraphInner> {
        &self.inner
    }

    /// Pins the native graph for the lifetime of the returned reference.
    ///
    /// Fails with [`Error::GraphClosed`] once the graph is closed or being
    /// closed.
    pub fn reference(&self) -> Result<Reference<'_, ffi::TF_Graph>> {
        self.inner.reference()
    }

    /// Looks up an operation by name.
    pub fn operation(&self, name: &str) -> Result<Option<Operation>> {
        let name = cstring(name)?;
        let graph = self.reference()?;
        let op = unsafe { ffi::TF_GraphOperationByName(graph.as_ptr(), name.as_ptr()) };
        Ok(NonNull::new(op).map(|op| Operation::new(self.inner.clone(), op)))
    }

    /// Returns every operation of the graph, in creation order.
    pub fn operations(&self) -> Result<Vec<Operation>> {
        let graph = self.reference()?;
        let mut pos: usize = 0;
        let mut operations = Vec::new();
        while let Some(op) =
            NonNull::new(unsafe { ffi::TF_GraphNextOperation(graph.as_ptr(), &mut pos) })
        {
            operations.push(Operation::new(self.inner.clone(), op));
        }
        Ok(operations)
    }

    /// Starts building an operation of type `op_type` named `name`.
    ///
    /// The graph stays pinned until the builder is finished or dropped, so
    /// it cannot be closed in the meantime.
    pub fn new_operation(&self, op_type: &str, name: &str) -> Result<OperationBuilder<'_>> {
        OperationBuilder::new(self, op_type, name)
    }

    /// Adds the symbolic partial derivatives of the sum of `y` with respect
    /// to each of `x`.
    ///
    /// `dx` seeds the gradient of each `y`; without it ones are used.
    /// Without a `prefix` the nodes are added under a unique name starting
    /// with `gradients`.
    pub fn add_gradients(
        &self,
        prefix: Option<&str>,
        y: &[Output],
        x: &[Output],
        dx: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        if let Some(dx) = dx {
            if dx.len() != y.len() {
                return Err(Error::InvalidArgument(format!(
                    "Expected {} gradient seeds, got {}",
                    y.len(),
                    dx.len()
                )));
            }
        }
        let prefix = prefix.map(cstring).transpose()?;

        let graph = self.reference()?;
        let mut ys = self.to_native(y)?;
        let mut xs = self.to_native(x)?;
        let mut dxs = dx.map(|dx| self.to_native(dx)).transpose()?;
        let mut dy = vec![ffi::TF_Output::default(); x.len()];

        let mut status = Status::new()?;
        unsafe {
            ffi::TF_AddGradientsWithPrefix(
                graph.as_ptr(),
                prefix.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
                ys.as_mut_ptr(),
                ys.len() as c_int,
                xs.as_mut_ptr(),
                xs.len() as c_int,
                dxs.as_mut().map_or(ptr::null_mut(), |d| d.as_mut_ptr()),
                status.as_mut_ptr(),
                dy.as_mut_ptr(),
            )
        };
        status.check()?;

        dy.into_iter()
            .map(|d| {
                let op = NonNull::new(d.oper).ok_or(Error::EmptyValue)?;
                Ok(Output::new(
                    Operation::new(self.inner.clone(), op),
                    d.index as usize,
                ))
            })
            .collect()
    }

    /// Converts outputs of this graph for a native call.
    ///
    /// The caller must hold a reference to the graph.
    pub(crate) fn to_native(&self, outputs: &[Output]) -> Result<Vec<ffi::TF_Output>> {
        outputs.iter().map(|o| o.to_native(&self.inner)).collect()
    }

    /// Destroys the native graph, waiting for outstanding references first.
    ///
    /// Calls after the first are no-ops.
    pub fn close(&self) -> Result<()> {
        self.inner.handle.close(|ptr| {
            unsafe { ffi::TF_DeleteGraph(ptr.as_ptr()) };
            debug!("Deleted graph {:p}", ptr);
            Ok(())
        })
    }

    /// Returns `true` once closing has started.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Could not close graph: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    fn placeholder(graph: &Graph, name: &str) -> Operation {
        graph
            .new_operation("Placeholder", name)
            .unwrap()
            .set_attr_type("dtype", DataType::Float32)
            .unwrap()
            .finish()
            .unwrap()
    }

    #[test]
    fn lookup_and_iteration() {
        let graph = Graph::new().unwrap();
        let x = placeholder(&graph, "x");
        let y = placeholder(&graph, "y");

        assert_eq!(graph.operation("x").unwrap(), Some(x.clone()));
        assert_eq!(graph.operation("z").unwrap(), None);
        assert_eq!(graph.operations().unwrap(), vec![x, y]);
    }

    #[test]
    fn closed_graph_refuses_access() {
        let graph = Graph::new().unwrap();
        let x = placeholder(&graph, "x");

        graph.close().unwrap();
        graph.close().unwrap();
        assert!(graph.is_closed());

        assert!(matches!(graph.reference(), Err(Error::GraphClosed)));
        assert!(matches!(graph.operation("x"), Err(Error::GraphClosed)));
        assert!(matches!(x.name(), Err(Error::GraphClosed)));
        assert!(matches!(x.output(0).shape(), Err(Error::GraphClosed)));
    }

    #[test]
    fn gradient_seed_count_must_match() {
        let graph = Graph::new().unwrap();
        let x = placeholder(&graph, "x").output(0);
        let err = graph
            .add_gradients(None, &[x.clone()], &[x.clone()], Some(&[]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
