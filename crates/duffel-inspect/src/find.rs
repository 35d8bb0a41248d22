//! Pattern-based search below a directory.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use duffel_core::{EntryKind, Existence, FsError, Matcher, absolutize};

use crate::inspect::{exists, run_blocking};
use crate::walker::{WalkOptions, Walker};

/// Options for [`find`].
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct FindOptions {
    /// Glob patterns to match, see [`Matcher`].
    #[builder(default = "vec![String::from(\"*\")]")]
    #[serde(default = "default_matching")]
    pub matching: Vec<String>,

    /// Yield regular files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub files: bool,

    /// Yield directories.
    #[builder(default = "false")]
    #[serde(default)]
    pub directories: bool,

    /// Yield symlinks.
    #[builder(default = "false")]
    #[serde(default)]
    pub symlinks: bool,

    /// Descend below the immediate children.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub recursive: bool,
}

fn default_matching() -> Vec<String> {
    vec![String::from("*")]
}

fn default_true() -> bool {
    true
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            matching: default_matching(),
            files: true,
            directories: false,
            symlinks: false,
            recursive: true,
        }
    }
}

impl FindOptions {
    /// Create an options builder.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }
}

/// Find entries below `base` whose paths match the patterns.
///
/// The base itself is never part of the result. Paths come back sorted
/// and rooted the way `base` was given. A missing or non-directory
/// base is an error.
pub fn find(base: impl AsRef<Path>, options: &FindOptions) -> Result<Vec<PathBuf>, FsError> {
    let base = base.as_ref();
    match exists(base)? {
        Some(Existence::Dir) => {}
        Some(_) => return Err(FsError::not_a_directory(base)),
        None => return Err(FsError::not_found(base)),
    }

    let matcher = Matcher::compile(absolutize(base)?, &options.matching)?;
    let walk_options = WalkOptions {
        max_depth: if options.recursive { None } else { Some(1) },
        ..Default::default()
    };

    let mut found = Vec::new();
    for item in Walker::new(base, walk_options) {
        let item = item?;
        if item.depth == 0 {
            continue;
        }
        let Some(entry) = item.entry else { continue };
        let wanted = match entry.kind {
            EntryKind::File => options.files,
            EntryKind::Dir => options.directories,
            EntryKind::Symlink => options.symlinks,
            EntryKind::Other => false,
        };
        if !wanted {
            continue;
        }
        if matcher.matches(&absolutize(&item.path)?) {
            found.push(item.path);
        }
    }
    found.sort();
    Ok(found)
}

/// Async twin of [`find`], run on the blocking pool.
pub async fn find_async(
    base: impl Into<PathBuf>,
    options: FindOptions,
) -> Result<Vec<PathBuf>, FsError> {
    let base = base.into();
    run_blocking(base.clone(), move || find(&base, &options)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::write(base.join("a.txt"), b"").unwrap();
        fs::write(base.join("b.md"), b"").unwrap();
        fs::create_dir_all(base.join("src/deep")).unwrap();
        fs::write(base.join("src/lib.rs"), b"").unwrap();
        fs::write(base.join("src/deep/more.rs"), b"").unwrap();
        tmp
    }

    #[test]
    fn test_find_by_extension() {
        let tmp = fixture();
        let options = FindOptions {
            matching: vec!["*.rs".into()],
            ..Default::default()
        };
        let found = find(tmp.path(), &options).unwrap();
        assert_eq!(
            found,
            vec![
                tmp.path().join("src/deep/more.rs"),
                tmp.path().join("src/lib.rs"),
            ]
        );
    }

    #[test]
    fn test_find_default_yields_files_only() {
        let tmp = fixture();
        let found = find(tmp.path(), &FindOptions::default()).unwrap();
        assert_eq!(found.len(), 4);
        assert!(!found.contains(&tmp.path().join("src")));
    }

    #[test]
    fn test_find_directories() {
        let tmp = fixture();
        let options = FindOptions {
            files: false,
            directories: true,
            ..Default::default()
        };
        let found = find(tmp.path(), &options).unwrap();
        assert_eq!(
            found,
            vec![tmp.path().join("src"), tmp.path().join("src/deep")]
        );
    }

    #[test]
    fn test_find_non_recursive() {
        let tmp = fixture();
        let options = FindOptions {
            recursive: false,
            ..Default::default()
        };
        let found = find(tmp.path(), &options).unwrap();
        assert_eq!(
            found,
            vec![tmp.path().join("a.txt"), tmp.path().join("b.md")]
        );
    }

    #[test]
    fn test_find_with_negation() {
        let tmp = fixture();
        let options = FindOptions {
            matching: vec!["*".into(), "!*.md".into()],
            ..Default::default()
        };
        let found = find(tmp.path(), &options).unwrap();
        assert!(!found.iter().any(|p| p.extension().is_some_and(|e| e == "md")));
        assert!(found.contains(&tmp.path().join("a.txt")));
    }

    #[test]
    fn test_find_missing_base_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = find(tmp.path().join("nope"), &FindOptions::default()).unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));

        fs::write(tmp.path().join("file"), b"").unwrap();
        let err = find(tmp.path().join("file"), &FindOptions::default()).unwrap_err();
        assert!(matches!(err, FsError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_find_async() {
        let tmp = fixture();
        let options = FindOptions {
            matching: vec!["*.txt".into()],
            ..Default::default()
        };
        let found = find_async(tmp.path(), options).await.unwrap();
        assert_eq!(found, vec![tmp.path().join("a.txt")]);
    }
}
