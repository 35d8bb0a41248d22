//! Error types for filesystem operations.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed classification of operation failures.
///
/// Callers branch on kinds instead of platform error strings. Native
/// errors are mapped exactly once, in [`FsError::io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The path does not exist.
    NotFound,
    /// The destination is already occupied.
    AlreadyExists,
    /// A directory was required but something else was found.
    NotADirectory,
    /// A file was required but something else was found.
    NotAFile,
    /// The OS denied access.
    PermissionDenied,
    /// A directory could not be removed because it has children.
    DirectoryNotEmpty,
    /// A rename crossed filesystem boundaries.
    CrossDevice,
    /// The caller supplied unusable input.
    InvalidInput,
    /// Anything the taxonomy does not name.
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::NotADirectory => "not a directory",
            Self::NotAFile => "not a file",
            Self::PermissionDenied => "permission denied",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::CrossDevice => "cross-device",
            Self::InvalidInput => "invalid input",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// Errors that can occur during filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path not found.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Destination already occupied.
    #[error("Already exists: {path}")]
    AlreadyExists { path: PathBuf },

    /// Expected a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Expected a file.
    #[error("Not a file: {path}")]
    NotAFile { path: PathBuf },

    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Directory still has children.
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rename crossed a filesystem boundary.
    #[error("Cross-device link: {path}")]
    CrossDevice {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid argument or option.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    /// Create an I/O error with path context, classified by kind.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            std::io::ErrorKind::NotADirectory => Self::NotADirectory { path },
            std::io::ErrorKind::IsADirectory => Self::NotAFile { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path, source },
            std::io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty { path, source },
            std::io::ErrorKind::CrossesDevices => Self::CrossDevice { path, source },
            _ => Self::Io { path, source },
        }
    }

    /// Create a not-found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an already-exists error.
    pub fn already_exists(path: impl Into<PathBuf>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create a not-a-directory error.
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self::NotADirectory { path: path.into() }
    }

    /// Create a not-a-file error.
    pub fn not_a_file(path: impl Into<PathBuf>) -> Self {
        Self::NotAFile { path: path.into() }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotADirectory { .. } => ErrorKind::NotADirectory,
            Self::NotAFile { .. } => ErrorKind::NotAFile,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::DirectoryNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            Self::CrossDevice { .. } => ErrorKind::CrossDevice,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Io { .. } => ErrorKind::Unknown,
        }
    }

    /// Path the error is attached to, when there is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::NotFound { path }
            | Self::AlreadyExists { path }
            | Self::NotADirectory { path }
            | Self::NotAFile { path }
            | Self::PermissionDenied { path, .. }
            | Self::DirectoryNotEmpty { path, .. }
            | Self::CrossDevice { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::InvalidInput { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classifies_not_found() {
        let err = FsError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(matches!(err, FsError::NotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_io_classifies_permission_denied() {
        let err = FsError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, FsError::PermissionDenied { .. }));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_io_classifies_is_a_directory_as_not_a_file() {
        let err = FsError::io(
            "/test/dir",
            std::io::Error::new(std::io::ErrorKind::IsADirectory, "is a dir"),
        );
        assert!(matches!(err, FsError::NotAFile { .. }));
        assert_eq!(err.kind(), ErrorKind::NotAFile);
    }

    #[test]
    fn test_unclassified_io_maps_to_unknown() {
        let err = FsError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"),
        );
        assert!(matches!(err, FsError::Io { .. }));
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_error_carries_path() {
        let err = FsError::not_found("/some/where");
        assert_eq!(err.path(), Some(Path::new("/some/where")));
        let err = FsError::invalid_input("bad pattern");
        assert_eq!(err.path(), None);
    }
}
