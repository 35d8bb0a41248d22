//! Single-entry inspection.

use std::fs::{self, Metadata};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use compact_str::CompactString;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use duffel_core::{
    Checksum, ChecksumAlgo, Descriptor, EntryKind, Existence, FsError, Timestamps, absolutize,
    mode_of,
};

/// How symlinks are treated during inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkMode {
    /// Describe the link itself.
    #[default]
    Report,
    /// Describe whatever the link points at.
    Follow,
}

/// What [`inspect`] collects beyond name, kind and size.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
pub struct InspectOptions {
    /// Collect normalized permission bits.
    #[serde(default)]
    pub mode: bool,

    /// Collect access/modify/change times.
    #[serde(default)]
    pub times: bool,

    /// Compute a content checksum for regular files.
    #[serde(default)]
    pub checksum: Option<ChecksumAlgo>,

    /// Record the absolute path in the descriptor.
    #[serde(default)]
    pub absolute_path: bool,

    /// Symlink handling.
    #[serde(default)]
    pub symlinks: SymlinkMode,
}

impl InspectOptions {
    /// Create an options builder.
    pub fn builder() -> InspectOptionsBuilder {
        InspectOptionsBuilder::default()
    }
}

/// Describe a single path.
///
/// Returns `Ok(None)` when nothing occupies the path (including a
/// broken symlink inspected with [`SymlinkMode::Follow`]); every other
/// failure surfaces as an error.
pub fn inspect(path: impl AsRef<Path>, options: &InspectOptions) -> Result<Option<Descriptor>, FsError> {
    let path = path.as_ref();
    let metadata = match stat(path, options.symlinks) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FsError::io(path, e)),
    };
    describe(path, &metadata, options).map(Some)
}

/// Async twin of [`inspect`], run on the blocking pool.
pub async fn inspect_async(
    path: impl Into<PathBuf>,
    options: InspectOptions,
) -> Result<Option<Descriptor>, FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || inspect(&path, &options)).await
}

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

/// Check what occupies a path, if anything.
///
/// Symlinks are followed, so a broken link reports as absent.
pub fn exists(path: impl AsRef<Path>) -> Result<Option<Existence>, FsError> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Ok(metadata) => {
            let existence = if metadata.is_dir() {
                Existence::Dir
            } else if metadata.is_file() {
                Existence::File
            } else {
                Existence::Other
            };
            Ok(Some(existence))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Async twin of [`exists`].
pub async fn exists_async(path: impl Into<PathBuf>) -> Result<Option<Existence>, FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || exists(&path)).await
}

fn stat(path: &Path, symlinks: SymlinkMode) -> std::io::Result<Metadata> {
    match symlinks {
        SymlinkMode::Report => fs::symlink_metadata(path),
        SymlinkMode::Follow => fs::metadata(path),
    }
}

/// Build a descriptor from already-fetched metadata.
pub(crate) fn describe(
    path: &Path,
    metadata: &Metadata,
    options: &InspectOptions,
) -> Result<Descriptor, FsError> {
    let kind = kind_of(metadata);
    let name = match path.file_name() {
        Some(name) => CompactString::new(name.to_string_lossy()),
        None => CompactString::new(path.to_string_lossy()),
    };
    let size = if kind == EntryKind::File { metadata.len() } else { 0 };

    let points_at = if kind == EntryKind::Symlink {
        Some(fs::read_link(path).map_err(|e| FsError::io(path, e))?)
    } else {
        None
    };
    let checksum = match (kind, options.checksum) {
        (EntryKind::File, Some(algo)) => Some(checksum_file(path, algo)?),
        _ => None,
    };
    let absolute_path = if options.absolute_path {
        Some(absolutize(path)?)
    } else {
        None
    };

    Ok(Descriptor {
        name,
        kind,
        size,
        times: options.times.then(|| timestamps_of(metadata)),
        mode: options.mode.then(|| mode_of(metadata)),
        absolute_path,
        points_at,
        checksum,
    })
}

fn kind_of(metadata: &Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    }
}

fn timestamps_of(metadata: &Metadata) -> Timestamps {
    Timestamps {
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        accessed: metadata.accessed().ok(),
        changed: changed_of(metadata),
    }
}

#[cfg(unix)]
fn changed_of(metadata: &Metadata) -> Option<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    let secs = metadata.ctime();
    let nanos = metadata.ctime_nsec() as u32;
    if secs >= 0 {
        SystemTime::UNIX_EPOCH.checked_add(std::time::Duration::new(secs as u64, nanos))
    } else {
        None
    }
}

#[cfg(not(unix))]
fn changed_of(_metadata: &Metadata) -> Option<SystemTime> {
    None
}

const CHECKSUM_CHUNK: usize = 64 * 1024;

/// Digest a file's content.
pub(crate) fn checksum_file(path: &Path, algo: ChecksumAlgo) -> Result<Checksum, FsError> {
    match algo {
        ChecksumAlgo::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            hasher
                .update_mmap_rayon(path)
                .map_err(|e| FsError::io(path, e))?;
            Ok(Checksum::new(algo, *hasher.finalize().as_bytes()))
        }
        ChecksumAlgo::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut file = fs::File::open(path).map_err(|e| FsError::io(path, e))?;
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; CHECKSUM_CHUNK];
            loop {
                let n = file.read(&mut buf).map_err(|e| FsError::io(path, e))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(Checksum::new(algo, hasher.finalize().into()))
        }
    }
}

/// Digest an in-memory buffer. Used for directory rollup checksums.
pub(crate) fn checksum_bytes(bytes: &[u8], algo: ChecksumAlgo) -> Checksum {
    match algo {
        ChecksumAlgo::Blake3 => Checksum::new(algo, *blake3::hash(bytes).as_bytes()),
        ChecksumAlgo::Sha256 => {
            use sha2::{Digest, Sha256};
            Checksum::new(algo, Sha256::digest(bytes).into())
        }
    }
}
