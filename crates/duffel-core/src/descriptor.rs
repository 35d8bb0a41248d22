//! Filesystem entry descriptors.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Checksum algorithms supported by inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgo {
    /// BLAKE3, the default. Fast and parallelizable.
    #[default]
    Blake3,
    /// SHA-256, for interoperability with external tooling.
    Sha256,
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blake3 => write!(f, "blake3"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// A content digest together with the algorithm that produced it.
///
/// Both supported algorithms emit 32 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    /// Algorithm that produced the digest.
    pub algo: ChecksumAlgo,
    /// Raw digest bytes.
    pub bytes: [u8; 32],
}

impl Checksum {
    /// Create a checksum from raw digest bytes.
    pub fn new(algo: ChecksumAlgo, bytes: [u8; 32]) -> Self {
        Self { algo, bytes }
    }

    /// Convert to a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Entry timestamps.
///
/// `changed` is the inode change time, available on Unix only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Last modification time.
    pub modified: SystemTime,
    /// Last access time, if the filesystem tracks it.
    pub accessed: Option<SystemTime>,
    /// Inode change time, if the platform reports it.
    pub changed: Option<SystemTime>,
}

/// What kind of entry occupies a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
    /// Anything else (socket, fifo, device).
    Other,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Dir => "dir",
            Self::Symlink => "symlink",
            Self::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Coarse answer to "what occupies this path?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Existence {
    /// A regular file.
    File,
    /// A directory.
    Dir,
    /// Something else.
    Other,
}

/// An immutable description of one filesystem entry.
///
/// Only `name`, `kind` and `size` are always present; the optional
/// fields are filled in when the corresponding inspect option asks
/// for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// Final path component, or the whole path for roots like `/`.
    pub name: CompactString,
    /// Entry kind.
    pub kind: EntryKind,
    /// File size in bytes. Zero for directories and symlinks.
    pub size: u64,
    /// Timestamps, when requested.
    pub times: Option<Timestamps>,
    /// Normalized permission bits, when requested.
    pub mode: Option<u32>,
    /// Absolute path of the entry, when requested.
    pub absolute_path: Option<PathBuf>,
    /// Symlink target, for symlink entries.
    pub points_at: Option<PathBuf>,
    /// Content checksum, when requested for a regular file.
    pub checksum: Option<Checksum>,
}

impl Descriptor {
    /// Create a minimal descriptor with no optional fields collected.
    pub fn new(name: impl Into<CompactString>, kind: EntryKind, size: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
            times: None,
            mode: None,
            absolute_path: None,
            points_at: None,
            checksum: None,
        }
    }

    /// Whether this entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Whether this entry is a symlink.
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Modification time, when timestamps were collected.
    pub fn modified(&self) -> Option<SystemTime> {
        self.times.map(|t| t.modified)
    }
}
