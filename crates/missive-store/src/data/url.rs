//! External-URL payload backend.
//!
//! The only backend that may legitimately fail to reopen — the page behind
//! the URL can vanish at any time. Such failures surface as [`StoreError::Io`]
//! and are never treated as store corruption.

use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, StoreError};

/// Payload bytes behind a URL (`http(s)://` or `file://`). Read-only; the
/// store owns nothing behind a remote URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UrlDataRef {
    url: String,
}

impl UrlDataRef {
    /// Reference a URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// The URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.url
            .strip_prefix("file://")
            .map(PathBuf::from)
    }

    /// Payload length: file metadata for `file://`, Content-Length for
    /// remote URLs (absent when the server does not say).
    pub fn size(&self) -> Result<Option<u64>> {
        if let Some(path) = self.file_path() {
            return Ok(Some(std::fs::metadata(path)?.len()));
        }
        let response = reqwest::blocking::Client::new()
            .head(&self.url)
            .send()
            .map_err(io_other)?;
        if !response.status().is_success() {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "HEAD {} returned {}",
                self.url,
                response.status()
            ))));
        }
        Ok(response.content_length())
    }

    /// Open a read stream. May fail if the resource no longer exists.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        if let Some(path) = self.file_path() {
            return Ok(Box::new(std::fs::File::open(path)?));
        }
        let response = reqwest::blocking::get(&self.url).map_err(io_other)?;
        if !response.status().is_success() {
            return Err(StoreError::Io(std::io::Error::other(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            ))));
        }
        Ok(Box::new(response))
    }

    /// Remove the file for `file://` URLs; a successful no-op for remote
    /// URLs, which this store does not own.
    pub fn delete(&self) -> Result<()> {
        if let Some(path) = self.file_path() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn io_other(e: reqwest::Error) -> StoreError {
    StoreError::Io(std::io::Error::other(e))
}
