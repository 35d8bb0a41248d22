//! File content readers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use duffel_core::FsError;

use crate::inspect::run_blocking;

/// Read a file as raw bytes. `Ok(None)` when the path does not exist.
pub fn read_bytes(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, FsError> {
    let path = path.as_ref();
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Read a file as UTF-8 text. `Ok(None)` when the path does not exist.
pub fn read(path: impl AsRef<Path>) -> Result<Option<String>, FsError> {
    let path = path.as_ref();
    match read_bytes(path)? {
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Ok(Some(text)),
            Err(_) => Err(FsError::invalid_input(format!(
                "{} is not valid UTF-8",
                path.display()
            ))),
        },
        None => Ok(None),
    }
}

/// Read and deserialize a JSON file. `Ok(None)` when the path does not
/// exist.
pub fn read_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Option<T>, FsError> {
    let path = path.as_ref();
    match read_bytes(path)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| FsError::invalid_input(format!("{}: {e}", path.display()))),
        None => Ok(None),
    }
}

/// Async twin of [`read_bytes`].
pub async fn read_bytes_async(path: impl Into<PathBuf>) -> Result<Option<Vec<u8>>, FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || read_bytes(&path)).await
}

/// Async twin of [`read`].
pub async fn read_async(path: impl Into<PathBuf>) -> Result<Option<String>, FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || read(&path)).await
}

/// Async twin of [`read_json`].
pub async fn read_json_async<T>(path: impl Into<PathBuf>) -> Result<Option<T>, FsError>
where
    T: DeserializeOwned + Send + 'static,
{
    let path = path.into();
    run_blocking(path.clone(), move || read_json(&path)).await
}
