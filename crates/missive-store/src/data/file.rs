//! Filesystem payload backend.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

use super::{DataFilter, DataRef, copy_streams};

/// Payload bytes in a filesystem file. The file survives process restarts
/// and is owned externally; `delete` removes it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileDataRef {
    path: PathBuf,
}

impl FileDataRef {
    /// Reference an existing file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Duplicate `source` into a new file at `path`, optionally through
    /// `filter`.
    pub fn copy_from(source: &DataRef, path: impl Into<PathBuf>, filter: Option<&DataFilter>) -> Result<Self> {
        let path = path.into();
        let mut input = source.open()?;
        let mut output = File::create(&path)?;
        copy_streams(&mut input, &mut output, filter)?;
        Ok(Self { path })
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File length, from metadata.
    pub fn size(&self) -> Result<Option<u64>> {
        Ok(Some(std::fs::metadata(&self.path)?.len()))
    }

    /// Open the file for reading.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    /// Remove the file.
    pub fn delete(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
