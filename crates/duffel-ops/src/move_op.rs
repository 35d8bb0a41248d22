//! Move and rename.
//!
//! A move is a rename when source and destination share a filesystem.
//! When the kernel refuses with a cross-device error, the move falls
//! back to a time-preserving copy followed by removal of the source.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use duffel_core::FsError;

use crate::copy::{self, CopyOptions, occupied, precheck, reject_nested_source};
use crate::remove::{RemoveOptions, remove, remove_async};
use crate::write::{create_parents, run_blocking};

/// Options for [`move_path`] and [`move_path_async`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    /// Replace an existing destination entry.
    pub overwrite: bool,
}

/// Move `from` to `to`, blocking.
///
/// Missing destination parents are created. With `overwrite`, an
/// existing destination entry is removed first; without it, an
/// occupied destination is an error. A destination that contains the
/// source is rejected either way.
pub fn move_path(
    from: impl AsRef<Path>,
    to: impl AsRef<Path>,
    options: &MoveOptions,
) -> Result<(), FsError> {
    let from = from.as_ref();
    let to = to.as_ref();
    precheck(from, to, options.overwrite)?;
    reject_nested_source(from, to)?;
    if options.overwrite && occupied(to)? {
        remove(to, &RemoveOptions::new())?;
    }
    // A missing parent surfaces before a cross-device refusal, so the
    // retry after creating parents can still land on another device.
    let renamed = match fs::rename(from, to) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_parents(to)?;
            fs::rename(from, to)
        }
        other => other,
    };
    match renamed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), to = %to.display(), "cross-device move, copying");
            transplant(from, to)
        }
        Err(e) => Err(FsError::io(from, e)),
    }
}

/// Async twin of [`move_path`]. The cross-device fallback runs through
/// the async copy and remove engines.
pub async fn move_path_async(
    from: impl Into<PathBuf>,
    to: impl Into<PathBuf>,
    options: MoveOptions,
) -> Result<(), FsError> {
    let from = from.into();
    let to = to.into();
    {
        let (from, to) = (from.clone(), to.clone());
        run_blocking(from.clone(), move || {
            precheck(&from, &to, options.overwrite)?;
            reject_nested_source(&from, &to)
        })
        .await?;
    }
    if options.overwrite {
        let probe = to.clone();
        let exists = run_blocking(to.clone(), move || occupied(&probe)).await?;
        if exists {
            remove_async(to.clone(), RemoveOptions::new()).await?;
        }
    }
    let renamed = match tokio::fs::rename(&from, &to).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let parent_of = to.clone();
            run_blocking(to.clone(), move || create_parents(&parent_of)).await?;
            tokio::fs::rename(&from, &to).await
        }
        other => other,
    };
    match renamed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            debug!(from = %from.display(), to = %to.display(), "cross-device move, copying");
            copy::copy_async(from.clone(), to, transplant_options()).await?;
            remove_async(from, RemoveOptions::new()).await?;
            Ok(())
        }
        Err(e) => Err(FsError::io(from, e)),
    }
}

/// The destination was settled before the rename attempt; the fallback
/// copy may therefore replace whatever half-state a race left behind.
fn transplant_options() -> CopyOptions {
    CopyOptions::new().with_overwrite(true).with_preserve_times(true)
}

fn transplant(from: &Path, to: &Path) -> Result<(), FsError> {
    copy::copy(from, to, transplant_options())?;
    remove(from, &RemoveOptions::new())?;
    Ok(())
}

/// Give an entry a new name in place.
///
/// The name must be a single path component; the entry stays in its
/// directory. Renaming to the current name is a no-op.
pub fn rename(path: impl AsRef<Path>, new_name: &str) -> Result<(), FsError> {
    let path = path.as_ref();
    let target = rename_target(path, new_name)?;
    if target == path {
        return Ok(());
    }
    if !occupied(path)? {
        return Err(FsError::not_found(path));
    }
    if occupied(&target)? {
        return Err(FsError::already_exists(target));
    }
    fs::rename(path, &target).map_err(|e| FsError::io(path, e))
}

/// Async twin of [`rename`].
pub async fn rename_async(path: impl Into<PathBuf>, new_name: &str) -> Result<(), FsError> {
    let path = path.into();
    let new_name = new_name.to_owned();
    run_blocking(path.clone(), move || rename(&path, &new_name)).await
}

fn rename_target(path: &Path, new_name: &str) -> Result<PathBuf, FsError> {
    if new_name.is_empty() {
        return Err(FsError::invalid_input("New name must not be empty"));
    }
    if new_name == "." || new_name == ".." {
        return Err(FsError::invalid_input(format!(
            "New name must not be '{new_name}'"
        )));
    }
    if new_name.contains('/') || new_name.contains('\\') {
        return Err(FsError::invalid_input(format!(
            "New name must be a single path component: {new_name}"
        )));
    }
    let Some(parent) = path.parent() else {
        return Err(FsError::invalid_input(format!(
            "Cannot rename {}",
            path.display()
        )));
    };
    Ok(parent.join(new_name))
}
