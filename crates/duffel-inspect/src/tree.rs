//! Whole-subtree inspection.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use duffel_core::{ChecksumAlgo, Descriptor, EntryKind, FsError};

use crate::inspect::{InspectOptions, SymlinkMode, checksum_bytes, inspect, run_blocking};
use crate::list::list;

/// Options for [`inspect_tree`].
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
pub struct TreeOptions {
    /// Per-file checksum algorithm. Directories get a rollup digest of
    /// their children's names and digests.
    #[serde(default)]
    pub checksum: Option<ChecksumAlgo>,

    /// Collect timestamps for every entry.
    #[serde(default)]
    pub times: bool,

    /// Record each entry's path relative to the inspected root, `"."`
    /// for the root itself.
    #[serde(default)]
    pub relative_path: bool,

    /// Symlink handling for the per-entry descriptors. Symlinks are
    /// never descended into regardless of this setting.
    #[serde(default)]
    pub symlinks: SymlinkMode,
}

impl TreeOptions {
    /// Create an options builder.
    pub fn builder() -> TreeOptionsBuilder {
        TreeOptionsBuilder::default()
    }
}

/// A descriptor with its children, sizes aggregated bottom-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Descriptor of this entry. For directories, `size` is the sum of
    /// the children's sizes.
    pub descriptor: Descriptor,
    /// Path relative to the inspected root, when requested.
    pub relative_path: Option<String>,
    /// Child entries, sorted by name. Empty for non-directories.
    pub children: Vec<TreeEntry>,
}

impl TreeEntry {
    /// Total number of entries in this subtree, itself included.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TreeEntry::len).sum::<usize>()
    }

    /// Whether the subtree is a single childless entry.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Describe a whole subtree.
///
/// Returns `Ok(None)` when the root does not exist. Directory sizes
/// aggregate their children; with a checksum algorithm selected,
/// directories carry a digest derived from child names and digests, so
/// two trees with equal content hash equally.
pub fn inspect_tree(
    path: impl AsRef<Path>,
    options: &TreeOptions,
) -> Result<Option<TreeEntry>, FsError> {
    let path = path.as_ref();
    let inspect_options = per_entry_options(options);
    let Some(descriptor) = describe_entry(path, &inspect_options)? else {
        return Ok(None);
    };
    build(path, descriptor, ".", options, &inspect_options).map(Some)
}

/// Async twin of [`inspect_tree`], run on the blocking pool.
pub async fn inspect_tree_async(
    path: impl Into<PathBuf>,
    options: TreeOptions,
) -> Result<Option<TreeEntry>, FsError> {
    let path = path.into();
    run_blocking(path.clone(), move || inspect_tree(&path, &options)).await
}

fn per_entry_options(options: &TreeOptions) -> InspectOptions {
    InspectOptions {
        mode: false,
        times: options.times,
        checksum: options.checksum,
        absolute_path: false,
        symlinks: options.symlinks,
    }
}

/// Inspect one entry, falling back to describing the link itself when
/// following it leads nowhere.
fn describe_entry(
    path: &Path,
    options: &InspectOptions,
) -> Result<Option<Descriptor>, FsError> {
    if let Some(descriptor) = inspect(path, options)? {
        return Ok(Some(descriptor));
    }
    if options.symlinks == SymlinkMode::Follow {
        let reported = InspectOptions {
            symlinks: SymlinkMode::Report,
            ..options.clone()
        };
        return inspect(path, &reported);
    }
    Ok(None)
}

fn build(
    path: &Path,
    mut descriptor: Descriptor,
    relative: &str,
    options: &TreeOptions,
    inspect_options: &InspectOptions,
) -> Result<TreeEntry, FsError> {
    // Descend on the entry's own kind, never through a symlink.
    let is_dir = descriptor.kind == EntryKind::Dir
        && (inspect_options.symlinks == SymlinkMode::Report
            || std::fs::symlink_metadata(path)
                .map(|m| m.file_type().is_dir())
                .unwrap_or(false));

    let mut children = Vec::new();
    if is_dir {
        let names = list(path)?.unwrap_or_default();
        for name in &names {
            let child_path = path.join(name);
            let child_relative = format!("{relative}/{name}");
            let Some(child_descriptor) = describe_entry(&child_path, inspect_options)? else {
                return Err(FsError::not_found(child_path));
            };
            children.push(build(
                &child_path,
                child_descriptor,
                &child_relative,
                options,
                inspect_options,
            )?);
        }

        descriptor.size = children.iter().map(|c| c.descriptor.size).sum();
        if let Some(algo) = options.checksum {
            descriptor.checksum = Some(rollup_checksum(&children, algo));
        }
    }

    Ok(TreeEntry {
        descriptor,
        relative_path: options.relative_path.then(|| relative.to_string()),
        children,
    })
}

/// Digest of a directory: child names and digests, one line each, in
/// sorted name order.
fn rollup_checksum(children: &[TreeEntry], algo: ChecksumAlgo) -> duffel_core::Checksum {
    let mut buffer = String::new();
    for child in children {
        let hex = child
            .descriptor
            .checksum
            .map(|sum| sum.to_hex())
            .unwrap_or_default();
        buffer.push_str(&child.descriptor.name);
        buffer.push(':');
        buffer.push_str(&hex);
        buffer.push('\n');
    }
    checksum_bytes(buffer.as_bytes(), algo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path();
        fs::create_dir(base.join("dir")).unwrap();
        fs::write(base.join("dir/a.txt"), b"12345").unwrap();
        fs::write(base.join("dir/b.txt"), b"123").unwrap();
        fs::create_dir(base.join("dir/empty")).unwrap();
        tmp
    }

    #[test]
    fn test_tree_aggregates_sizes() {
        let tmp = fixture();
        let tree = inspect_tree(tmp.path().join("dir"), &TreeOptions::default())
            .unwrap()
            .unwrap();

        assert_eq!(tree.descriptor.size, 8);
        assert_eq!(tree.children.len(), 3);
        assert_eq!(tree.len(), 4);
        // Children are sorted by name.
        let names: Vec<_> = tree
            .children
            .iter()
            .map(|c| c.descriptor.name.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "empty"]);
    }

    #[test]
    fn test_tree_missing_root_is_none() {
        let tmp = TempDir::new().unwrap();
        let tree = inspect_tree(tmp.path().join("ghost"), &TreeOptions::default()).unwrap();
        assert!(tree.is_none());
    }

    #[test]
    fn test_tree_relative_paths() {
        let tmp = fixture();
        let options = TreeOptions {
            relative_path: true,
            ..Default::default()
        };
        let tree = inspect_tree(tmp.path().join("dir"), &options)
            .unwrap()
            .unwrap();

        assert_eq!(tree.relative_path.as_deref(), Some("."));
        assert_eq!(tree.children[0].relative_path.as_deref(), Some("./a.txt"));
        assert_eq!(tree.children[2].relative_path.as_deref(), Some("./empty"));
    }

    #[test]
    fn test_equal_content_hashes_equal() {
        let tmp = TempDir::new().unwrap();
        for root in ["one", "two"] {
            let base = tmp.path().join(root);
            fs::create_dir_all(base.join("sub")).unwrap();
            fs::write(base.join("file.txt"), b"same content").unwrap();
            fs::write(base.join("sub/nested.txt"), b"also same").unwrap();
        }
        let options = TreeOptions {
            checksum: Some(ChecksumAlgo::Blake3),
            ..Default::default()
        };
        let one = inspect_tree(tmp.path().join("one"), &options)
            .unwrap()
            .unwrap();
        let two = inspect_tree(tmp.path().join("two"), &options)
            .unwrap()
            .unwrap();

        assert!(one.descriptor.checksum.is_some());
        assert_eq!(one.descriptor.checksum, two.descriptor.checksum);

        // Changing one byte changes the root digest.
        fs::write(tmp.path().join("two/file.txt"), b"diff content").unwrap();
        let changed = inspect_tree(tmp.path().join("two"), &options)
            .unwrap()
            .unwrap();
        assert_ne!(one.descriptor.checksum, changed.descriptor.checksum);
    }

    #[test]
    fn test_file_root_is_leaf() {
        let tmp = fixture();
        let tree = inspect_tree(tmp.path().join("dir/a.txt"), &TreeOptions::default())
            .unwrap()
            .unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.descriptor.size, 5);
    }

    #[tokio::test]
    async fn test_inspect_tree_async() {
        let tmp = fixture();
        let tree = inspect_tree_async(tmp.path().join("dir"), TreeOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tree.len(), 4);
    }
}
