//! Path helpers shared across the crates.

use std::path::{Path, PathBuf};

use crate::error::FsError;

/// Make a path absolute by joining it onto the current directory.
///
/// Unlike canonicalization this does not resolve symlinks and does not
/// require the path to exist.
pub fn absolutize(path: impl AsRef<Path>) -> Result<PathBuf, FsError> {
    let path = path.as_ref();
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| FsError::io(path, e))?;
    Ok(cwd.join(path))
}
