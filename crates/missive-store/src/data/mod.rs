//! Data references: one handle type over payload bytes.
//!
//! A [`DataRef`] names a byte sequence living in one of four places —
//! process memory, a file, a database blob row, or behind an external URL —
//! and exposes the same read-oriented contract everywhere: `size`, `open`,
//! `delete`. Mutation happens only by producing a *new* reference through a
//! backend's `copy_from` constructor, optionally streaming through a
//! [`DataFilter`] transform; sources are never modified in place.
//!
//! References serialize (serde) so they can be persisted inside record
//! columns. A deserialized blob reference must be re-attached to its
//! [`BlobStore`] before use.

mod blob;
mod file;
mod memory;
mod url;

pub use blob::{BlobDataRef, BlobStore};
pub use file::FileDataRef;
pub use memory::MemoryDataRef;
pub use url::UrlDataRef;

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Streaming transform applied while duplicating a reference: read the
/// source from `input`, write the (re-encoded, truncated, …) result to
/// `output`.
pub type DataFilter = dyn Fn(&mut dyn Read, &mut dyn Write) -> Result<()> + Send + Sync;

/// A reference to payload bytes in one of the four backends.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum DataRef {
    /// Bytes held in process memory; they die with the handle.
    Memory(MemoryDataRef),
    /// Bytes in a filesystem file, owned externally.
    File(FileDataRef),
    /// Bytes in a database blob row, owned by that row.
    Blob(BlobDataRef),
    /// Bytes behind an external URL; owned by neither side, read-only.
    Url(UrlDataRef),
}

impl DataRef {
    /// Payload length in bytes, when knowable without reading it all.
    pub fn size(&self) -> Result<Option<u64>> {
        match self {
            Self::Memory(r) => r.size(),
            Self::File(r) => r.size(),
            Self::Blob(r) => r.size(),
            Self::Url(r) => r.size(),
        }
    }

    /// Open a read stream over the payload.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        match self {
            Self::Memory(r) => r.open(),
            Self::File(r) => r.open(),
            Self::Blob(r) => r.open(),
            Self::Url(r) => r.open(),
        }
    }

    /// Destroy the underlying bytes, where this handle owns them.
    pub fn delete(&self) -> Result<()> {
        match self {
            Self::Memory(r) => r.delete(),
            Self::File(r) => r.delete(),
            Self::Blob(r) => r.delete(),
            Self::Url(r) => r.delete(),
        }
    }

    /// Re-bind a deserialized blob reference to its store. Other backends
    /// pass through unchanged.
    #[must_use]
    pub fn attach(self, blobs: &BlobStore) -> Self {
        match self {
            Self::Blob(r) => Self::Blob(r.attach(blobs)),
            other => other,
        }
    }
}

impl From<MemoryDataRef> for DataRef {
    fn from(r: MemoryDataRef) -> Self {
        Self::Memory(r)
    }
}

impl From<FileDataRef> for DataRef {
    fn from(r: FileDataRef) -> Self {
        Self::File(r)
    }
}

impl From<BlobDataRef> for DataRef {
    fn from(r: BlobDataRef) -> Self {
        Self::Blob(r)
    }
}

impl From<UrlDataRef> for DataRef {
    fn from(r: UrlDataRef) -> Self {
        Self::Url(r)
    }
}

/// Pump `input` into `output`, through `filter` when given.
pub fn copy_streams(
    input: &mut dyn Read,
    output: &mut dyn Write,
    filter: Option<&DataFilter>,
) -> Result<()> {
    match filter {
        Some(filter) => filter(input, output),
        None => {
            let _ = std::io::copy(input, output)?;
            Ok(())
        }
    }
}

/// Read the whole payload into memory.
pub fn read_all(reference: &DataRef) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let _ = reference.open()?.read_to_end(&mut out)?;
    Ok(out)
}

/// Stream the payload into a fresh temporary file.
pub fn save_to_temporary_file(reference: &DataRef) -> Result<tempfile::NamedTempFile> {
    let mut input = reference.open()?;
    let mut out = tempfile::NamedTempFile::new()?;
    copy_streams(&mut input, out.as_file_mut(), None)?;
    Ok(out)
}

/// Best-effort content comparison of two references.
///
/// Differing known sizes short-circuit to `false`; otherwise both streams
/// are compared chunk by chunk.
pub fn equivalent(a: &DataRef, b: &DataRef) -> Result<bool> {
    if let (Some(sa), Some(sb)) = (a.size()?, b.size()?) {
        if sa != sb {
            return Ok(false);
        }
    }
    let mut ra = a.open()?;
    let mut rb = b.open()?;
    let mut buf_a = [0u8; 8192];
    let mut buf_b = [0u8; 8192];
    loop {
        let na = read_full(&mut *ra, &mut buf_a)?;
        let nb = read_full(&mut *rb, &mut buf_b)?;
        if na != nb || buf_a[..na] != buf_b[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the stream allows; returns bytes read (0 = EOF).
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
