//! In-memory payload backend.

use std::io::{Cursor, Read};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

use super::{DataFilter, DataRef, copy_streams};

/// Payload bytes held in process memory. Cheap to clone (shared buffer);
/// the bytes live exactly as long as the handles do.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MemoryDataRef {
    data: Bytes,
}

impl MemoryDataRef {
    /// Wrap existing bytes.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Duplicate `source` into memory, optionally through `filter`.
    pub fn copy_from(source: &DataRef, filter: Option<&DataFilter>) -> Result<Self> {
        let mut input = source.open()?;
        let mut out = Vec::new();
        copy_streams(&mut input, &mut out, filter)?;
        Ok(Self {
            data: Bytes::from(out),
        })
    }

    /// The payload bytes.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Payload length.
    pub fn size(&self) -> Result<Option<u64>> {
        Ok(Some(self.data.len() as u64))
    }

    /// Open a read stream over the bytes.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }

    /// Nothing to destroy beyond the handle itself; the buffer is freed when
    /// the last clone drops.
    pub fn delete(&self) -> Result<()> {
        Ok(())
    }
}
