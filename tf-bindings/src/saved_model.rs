// SPDX-License-Identifier: Apache-2.0

use crate::{cstring, ffi, Buffer, Error, Graph, Handle, Result, Session, SessionOptions, Status};
use log::{debug, warn};
use std::ffi::c_int;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

/// A graph, a session over it and the metadata they were loaded with.
///
/// All three come out of a single native load call. Closing the bundle
/// closes the session first, then the graph.
#[derive(Debug)]
pub struct SavedModelBundle {
    graph: Graph,
    session: Session,
    meta_graph_def: Vec<u8>,
}

impl SavedModelBundle {
    /// Starts configuring a load of the SavedModel exported to `export_dir`.
    pub fn loader(export_dir: impl AsRef<Path>) -> Loader {
        Loader::new(export_dir)
    }

    /// Loads the meta graph of `export_dir` matching `tags`.
    pub fn load(export_dir: impl AsRef<Path>, tags: &[&str]) -> Result<Self> {
        Self::loader(export_dir).with_tags(tags).load()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the serialized `MetaGraphDef` exactly as the runtime produced it.
    pub fn meta_graph_def(&self) -> &[u8] {
        &self.meta_graph_def
    }

    /// Closes the session, then the graph.
    ///
    /// Calls after the first are no-ops.
    pub fn close(&self) -> Result<()> {
        let session = self.session.close();
        let graph = self.graph.close();
        session.and(graph)
    }
}

impl Drop for SavedModelBundle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Could not close saved model bundle: {}", e);
        }
    }
}

/// Options of a [`SavedModelBundle`] load.
#[derive(Debug, Clone)]
pub struct Loader {
    export_dir: PathBuf,
    tags: Vec<String>,
    config_proto: Option<Vec<u8>>,
    run_options: Option<Vec<u8>>,
}

impl Loader {
    /// Creates a loader for `export_dir` with the `serve` tag.
    pub fn new(export_dir: impl AsRef<Path>) -> Self {
        Loader {
            export_dir: export_dir.as_ref().to_path_buf(),
            tags: vec!["serve".to_string()],
            config_proto: None,
            run_options: None,
        }
    }

    /// Selects the meta graph tagged with exactly `tags`.
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Sets the serialized `ConfigProto` of the session.
    pub fn with_config_proto(mut self, config_proto: &[u8]) -> Self {
        self.config_proto = Some(config_proto.to_vec());
        self
    }

    /// Sets the serialized `RunOptions` used while restoring.
    pub fn with_run_options(mut self, run_options: &[u8]) -> Self {
        self.run_options = Some(run_options.to_vec());
        self
    }

    pub fn load(self) -> Result<SavedModelBundle> {
        let export_dir = self.export_dir.to_str().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Export directory {} is not valid UTF-8",
                self.export_dir.display()
            ))
        })?;
        let export_dir = cstring(export_dir)?;
        let tags = self
            .tags
            .iter()
            .map(|t| cstring(t))
            .collect::<Result<Vec<_>>>()?;
        let tag_ptrs: Vec<_> = tags.iter().map(|t| t.as_ptr()).collect();

        let options = match &self.config_proto {
            Some(config) => SessionOptions::new()?.with_config(config)?,
            None => SessionOptions::new()?,
        };
        let run_options = self
            .run_options
            .as_deref()
            .map(Buffer::from_bytes)
            .transpose()?;
        let mut meta_graph_def = Buffer::new()?;
        let mut status = Status::new()?;

        let graph = NonNull::new(unsafe { ffi::TF_NewGraph() }).ok_or(Error::EmptyValue)?;
        let session = unsafe {
            ffi::TF_LoadSessionFromSavedModel(
                options.as_ptr(),
                run_options.as_ref().map_or(ptr::null(), |b| b.as_ptr()),
                export_dir.as_ptr(),
                tag_ptrs.as_ptr(),
                tag_ptrs.len() as c_int,
                graph.as_ptr(),
                meta_graph_def.as_mut_ptr(),
                status.as_mut_ptr(),
            )
        };

        let session = status
            .check()
            .and_then(|_| NonNull::new(session).ok_or(Error::EmptyValue));
        let session = match session {
            Ok(session) => session,
            Err(e) => {
                // Nothing owns the graph yet.
                unsafe { ffi::TF_DeleteGraph(graph.as_ptr()) };
                return Err(e);
            }
        };

        debug!(
            "Loaded saved model {} with tags {:?}",
            self.export_dir.display(),
            self.tags
        );
        let graph = Graph::from_native(graph);
        let session = Session::from_native(session, &graph);
        Ok(SavedModelBundle {
            graph,
            session,
            meta_graph_def: meta_graph_def.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_defaults() {
        let loader = SavedModelBundle::loader("/models/m");
        assert_eq!(loader.tags, vec!["serve"]);
        assert_eq!(loader.config_proto, None);

        let loader = loader.with_tags(&["train", "gpu"]).with_config_proto(&[1, 2]);
        assert_eq!(loader.tags, vec!["train", "gpu"]);
        assert_eq!(loader.config_proto, Some(vec![1, 2]));
    }

    #[test]
    fn missing_export_dir() {
        let err = SavedModelBundle::load("/nonexistent/export", &["serve"]).unwrap_err();
        assert_eq!(err.code(), Some(crate::Code::NotFound));
    }
}
