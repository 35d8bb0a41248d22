//! Single-entry write operations.
//!
//! Every function here wraps one primitive syscall with the same
//! convenience contract: a write that fails because ancestors are
//! missing creates them and retries exactly once.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use duffel_core::{FsError, normalize_mode};

/// Suffix of the temporary sibling used by atomic writes.
const ATOMIC_SUFFIX: &str = ".__new__";

/// Run a blocking closure on the pool, attaching `context` to a join
/// failure.
pub(crate) async fn run_blocking<T: Send + 'static>(
    context: PathBuf,
    f: impl FnOnce() -> Result<T, FsError> + Send + 'static,
) -> Result<T, FsError> {
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(FsError::io(context, std::io::Error::other(e))),
    }
}

/// Create every missing ancestor of `path`.
pub(crate) fn create_parents(path: &Path) -> Result<(), FsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| FsError::io(parent, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_create_mode(options: &mut OpenOptions, mode: Option<u32>) {
    use std::os::unix::fs::OpenOptionsExt;
    if let Some(mode) = mode {
        options.mode(normalize_mode(mode));
    }
}

#[cfg(not(unix))]
pub(crate) fn set_create_mode(_options: &mut OpenOptions, _mode: Option<u32>) {}

/// Set permission bits on an existing entry.
#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<(), FsError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(normalize_mode(mode)))
        .map_err(|e| FsError::io(path, e))
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> Result<(), FsError> {
    Ok(())
}

/// Create a symlink at `path` pointing at `target`.
#[cfg(unix)]
pub(crate) fn platform_symlink(target: &Path, path: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(windows)]
pub(crate) fn platform_symlink(target: &Path, path: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, path)
    } else {
        std::os::windows::fs::symlink_file(target, path)
    }
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn platform_symlink(_target: &Path, _path: &Path) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// Options for [`write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Write to a temporary sibling first, then rename it over the
    /// target, so readers never observe a half-written file.
    pub atomic: bool,
    /// Permission bits for a newly created file.
    pub mode: Option<u32>,
}

/// Write a file, creating missing ancestors.
///
/// Truncates whatever was there. With `atomic` the content lands in a
/// `.__new__` sibling first.
pub fn write(
    path: impl AsRef<Path>,
    content: impl AsRef<[u8]>,
    options: &WriteOptions,
) -> Result<(), FsError> {
    let path = path.as_ref();
    let content = content.as_ref();
    if options.atomic {
        let staging = atomic_sibling(path);
        write_retrying(&staging, content, options.mode)?;
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(FsError::io(path, e));
        }
        Ok(())
    } else {
        write_retrying(path, content, options.mode)
    }
}

/// Async twin of [`write`].
pub async fn write_async(
    path: impl Into<PathBuf>,
    content: impl Into<Vec<u8>>,
    options: WriteOptions,
) -> Result<(), FsError> {
    let path = path.into();
    let content = content.into();
    run_blocking(path.clone(), move || write(&path, content, &options)).await
}

/// Serialize a value as pretty JSON and write it.
pub fn write_json<T: Serialize>(
    path: impl AsRef<Path>,
    value: &T,
    options: &WriteOptions,
) -> Result<(), FsError> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| FsError::invalid_input(format!("JSON serialization failed: {e}")))?;
    write(path, body, options)
}

/// Async twin of [`write_json`].
pub async fn write_json_async<T: Serialize>(
    path: impl Into<PathBuf>,
    value: &T,
    options: WriteOptions,
) -> Result<(), FsError> {
    let path = path.into();
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| FsError::invalid_input(format!("JSON serialization failed: {e}")))?;
    run_blocking(path.clone(), move || write(&path, body, &options)).await
}

/// Append to a file, creating it (and missing ancestors) as needed.
pub fn append(
    path: impl AsRef<Path>,
    content: impl AsRef<[u8]>,
    mode: Option<u32>,
) -> Result<(), FsError> {
    let path = path.as_ref();
    let content = content.as_ref();
    match try_append(path, content, mode) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_parents(path)?;
            try_append(path, content, mode).map_err(|e| FsError::io(path, e))
        }
        other => other.map_err(|e| FsError::io(path, e)),
    }
}

/// Async twin of [`append`].
pub async fn append_async(
    path: impl Into<PathBuf>,
    content: impl Into<Vec<u8>>,
    mode: Option<u32>,
) -> Result<(), FsError> {
    let path = path.into();
    let content = content.into();
    run_blocking(path.clone(), move || append(&path, content, mode)).await
}

/// Options for [`ensure_dir`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DirOptions {
    /// Remove any existing children, leaving the directory empty.
    pub empty: bool,
    /// Permission bits to enforce on the directory.
    pub mode: Option<u32>,
}

/// Ensure a directory exists at the path.
///
/// Creates missing ancestors. A path occupied by a non-directory is an
/// error.
pub fn ensure_dir(path: impl AsRef<Path>, options: &DirOptions) -> Result<(), FsError> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            if options.empty {
                clear_children(path)?;
            }
            if let Some(mode) = options.mode {
                set_mode(path, mode)?;
            }
            Ok(())
        }
        Ok(_) => Err(FsError::not_a_directory(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::create_dir_all(path).map_err(|e| FsError::io(path, e))?;
            if let Some(mode) = options.mode {
                set_mode(path, mode)?;
            }
            Ok(())
        }
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Async twin of [`ensure_dir`].
pub async fn ensure_dir_async(
    path: impl Into<PathBuf>,
    options: DirOptions,
) -> Result<(), FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || ensure_dir(&path, &options)).await
}

/// Options for [`ensure_file`].
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Content the file must have. `None` leaves existing content
    /// alone and creates new files empty.
    pub content: Option<Vec<u8>>,
    /// Permission bits to enforce on the file.
    pub mode: Option<u32>,
}

/// Ensure a regular file exists at the path.
///
/// Creates missing ancestors. A path occupied by a non-file is an
/// error.
pub fn ensure_file(path: impl AsRef<Path>, options: &FileOptions) -> Result<(), FsError> {
    let path = path.as_ref();
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_file() => {
            if let Some(content) = &options.content {
                write_retrying(path, content, options.mode)?;
            }
            if let Some(mode) = options.mode {
                set_mode(path, mode)?;
            }
            Ok(())
        }
        Ok(_) => Err(FsError::not_a_file(path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let content = options.content.as_deref().unwrap_or_default();
            write_retrying(path, content, options.mode)?;
            // The open-time mode is subject to the umask; enforce the
            // requested bits exactly.
            if let Some(mode) = options.mode {
                set_mode(path, mode)?;
            }
            Ok(())
        }
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Async twin of [`ensure_file`].
pub async fn ensure_file_async(
    path: impl Into<PathBuf>,
    options: FileOptions,
) -> Result<(), FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || ensure_file(&path, &options)).await
}

/// Create a symlink at `path` pointing at `target`, creating missing
/// ancestors of `path`.
pub fn symlink(target: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<(), FsError> {
    let target = target.as_ref();
    let path = path.as_ref();
    match platform_symlink(target, path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_parents(path)?;
            platform_symlink(target, path).map_err(|e| FsError::io(path, e))
        }
        other => other.map_err(|e| FsError::io(path, e)),
    }
}

/// Async twin of [`symlink`].
pub async fn symlink_async(
    target: impl Into<PathBuf>,
    path: impl Into<PathBuf>,
) -> Result<(), FsError> {
    let target = target.into();
    let path = path.into();
    run_blocking(path.clone(), move || symlink(&target, &path)).await
}

fn atomic_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(ATOMIC_SUFFIX);
    path.with_file_name(name)
}

/// One write attempt, with missing ancestors created and the write
/// retried exactly once.
fn write_retrying(path: &Path, content: &[u8], mode: Option<u32>) -> Result<(), FsError> {
    match try_write(path, content, mode) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "creating missing ancestors");
            create_parents(path)?;
            try_write(path, content, mode).map_err(|e| FsError::io(path, e))
        }
        other => other.map_err(|e| FsError::io(path, e)),
    }
}

fn try_write(path: &Path, content: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    set_create_mode(&mut options, mode);
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.flush()
}

fn try_append(path: &Path, content: &[u8], mode: Option<u32>) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    set_create_mode(&mut options, mode);
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.flush()
}

fn clear_children(path: &Path) -> Result<(), FsError> {
    let read_dir = fs::read_dir(path).map_err(|e| FsError::io(path, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| FsError::io(path, e))?;
        let child = entry.path();
        let file_type = entry.file_type().map_err(|e| FsError::io(&child, e))?;
        let result = if file_type.is_dir() {
            fs::remove_dir_all(&child)
        } else {
            fs::remove_file(&child)
        };
        result.map_err(|e| FsError::io(&child, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_missing_ancestors() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep/nested/file.txt");
        write(&path, "hello", &WriteOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_write_truncates_existing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        write(&path, "a long first version", &WriteOptions::default()).unwrap();
        write(&path, "short", &WriteOptions::default()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "short");
    }

    #[test]
    fn test_atomic_write_leaves_no_staging_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("conf.json");
        let options = WriteOptions {
            atomic: true,
            ..Default::default()
        };
        write(&path, "{}", &options).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["conf.json"]);
    }

    #[test]
    fn test_write_json_is_pretty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.json");
        write_json(&path, &serde_json::json!({"a": 1}), &WriteOptions::default()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_write_applies_mode() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("script.sh");
        let options = WriteOptions {
            mode: Some(0o744),
            ..Default::default()
        };
        write(&path, "#!/bin/sh\n", &options).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o744);
    }

    #[test]
    fn test_append_creates_then_extends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log/out.txt");
        append(&path, "one\n", None).unwrap();
        append(&path, "two\n", None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn test_ensure_dir_and_empty() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("a/b/c");
        ensure_dir(&dir, &DirOptions::default()).unwrap();
        assert!(dir.is_dir());

        fs::write(dir.join("junk.txt"), b"x").unwrap();
        fs::create_dir(dir.join("subdir")).unwrap();
        ensure_dir(
            &dir,
            &DirOptions {
                empty: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_dir_on_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("occupied");
        fs::write(&path, b"").unwrap();
        let err = ensure_dir(&path, &DirOptions::default()).unwrap_err();
        assert!(matches!(err, FsError::NotADirectory { .. }));
    }

    #[test]
    fn test_ensure_file_variants() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");

        // Creates empty when absent.
        ensure_file(&path, &FileOptions::default()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");

        // Existing content is left alone without a content option.
        fs::write(&path, b"keep me").unwrap();
        ensure_file(&path, &FileOptions::default()).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"keep me");

        // With content, the file is rewritten.
        ensure_file(
            &path,
            &FileOptions {
                content: Some(b"fresh".to_vec()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fresh");
    }

    #[test]
    fn test_ensure_file_on_dir_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = ensure_file(tmp.path(), &FileOptions::default()).unwrap_err();
        assert!(matches!(err, FsError::NotAFile { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_with_missing_parent() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("target.txt");
        fs::write(&target, b"t").unwrap();
        let link = tmp.path().join("links/one");
        symlink(&target, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target);
    }

    #[tokio::test]
    async fn test_async_twins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("async/file.txt");
        write_async(&path, "via pool", WriteOptions::default())
            .await
            .unwrap();
        append_async(&path, "!", None).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "via pool!");

        ensure_dir_async(tmp.path().join("async/dir"), DirOptions::default())
            .await
            .unwrap();
        assert!(tmp.path().join("async/dir").is_dir());
    }
}
