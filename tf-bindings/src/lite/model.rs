// SPDX-License-Identifier: Apache-2.0

use crate::{cstring, ffi, Error, Result};
use log::debug;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Where the bytes of a model live.
///
/// The native model may reference them until it is deleted.
#[derive(Debug)]
enum Storage {
    Bytes(Vec<u8>),
    Mapped(Mmap),
    File(PathBuf),
}

/// A TFLite model together with the storage backing it.
#[derive(Debug)]
pub struct Model {
    ptr: NonNull<ffi::TfLiteModel>,
    storage: Storage,
}

// The native model is immutable once created.
unsafe impl Send for Model {}

impl Model {
    /// Loads a model from the file at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::metadata(path)?;

        let path_str = path.to_str().ok_or_else(|| {
            Error::InvalidArgument(format!("Model path {} is not valid UTF-8", path.display()))
        })?;
        let c_path = cstring(path_str)?;
        let ptr = unsafe { ffi::TfLiteModelCreateFromFile(c_path.as_ptr()) };
        Self::new(ptr, Storage::File(path.to_path_buf()))
    }

    /// Creates a model from `bytes`, which it keeps for its lifetime.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let ptr = unsafe { ffi::TfLiteModelCreate(bytes.as_ptr() as *const _, bytes.len()) };
        Self::new(ptr, Storage::Bytes(bytes))
    }

    /// Creates a model from a read-only memory map of the file at `path`.
    pub fn from_mapped_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // The map is private to the model and never written through.
        let map = unsafe { Mmap::map(&file)? };
        let ptr = unsafe { ffi::TfLiteModelCreate(map.as_ptr() as *const _, map.len()) };
        Self::new(ptr, Storage::Mapped(map))
    }

    fn new(ptr: *mut ffi::TfLiteModel, storage: Storage) -> Result<Self> {
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::InvalidArgument(format!("Could not create a model from {}", describe(&storage)))
        })?;
        debug!("Created model from {}", describe(&storage));
        Ok(Model { ptr, storage })
    }

    pub(crate) fn as_ptr(&self) -> *const ffi::TfLiteModel {
        self.ptr.as_ptr()
    }

    /// Returns the model bytes, unless the model was loaded by path.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Bytes(b) => Some(b.as_slice()),
            Storage::Mapped(m) => Some(&m[..]),
            Storage::File(_) => None,
        }
    }
}

fn describe(storage: &Storage) -> String {
    match storage {
        Storage::Bytes(b) => format!("{} bytes", b.len()),
        Storage::Mapped(m) => format!("{} mapped bytes", m.len()),
        Storage::File(p) => format!("'{}'", p.display()),
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        unsafe { ffi::TfLiteModelDelete(self.ptr.as_ptr()) };
        debug!("Deleted model");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MODEL: &[u8] = b"TFLB\ninputs: x\noutputs: x\nx = Placeholder() dtype=int32 shape=[1]\n";

    #[test]
    fn storage_kinds() {
        let model = Model::from_bytes(MODEL.to_vec()).unwrap();
        assert_eq!(model.as_bytes(), Some(MODEL));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MODEL).unwrap();

        let mapped = Model::from_mapped_file(file.path()).unwrap();
        assert_eq!(mapped.as_bytes(), Some(MODEL));

        let by_path = Model::from_file(file.path()).unwrap();
        assert_eq!(by_path.as_bytes(), None);
    }

    #[test]
    fn invalid_models() {
        assert!(matches!(
            Model::from_bytes(b"garbage".to_vec()),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Model::from_file("/nonexistent/model.tflite"),
            Err(Error::Io(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OsStr::from_bytes(b"model\xff.tflite"));
        std::fs::write(&path, MODEL).unwrap();

        assert!(matches!(
            Model::from_file(&path),
            Err(Error::InvalidArgument(_))
        ));
    }
}
