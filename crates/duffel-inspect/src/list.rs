//! Directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use duffel_core::FsError;

use crate::inspect::run_blocking;

/// List a directory's entry names, sorted.
///
/// Returns `Ok(None)` when the path does not exist. A path occupied by
/// something other than a directory is an error.
pub fn list(path: impl AsRef<Path>) -> Result<Option<Vec<String>>, FsError> {
    let path = path.as_ref();
    let read_dir = match fs::read_dir(path) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::io(path, e)),
    };
    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| FsError::io(path, e))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(Some(names))
}

/// Async twin of [`list`].
pub async fn list_async(path: impl Into<PathBuf>) -> Result<Option<Vec<String>>, FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || list(&path)).await
}
