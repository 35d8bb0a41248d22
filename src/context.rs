//! Path-anchored contexts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_stream::wrappers::ReceiverStream;

use duffel_core::{Descriptor, Existence, FsError, absolutize};
use duffel_inspect::{
    FindOptions, InspectOptions, TreeEntry, TreeOptions, WalkItem, WalkOptions, Walker,
};
use duffel_ops::{
    CopyOptions, CopyReport, DirOptions, FileOptions, MoveOptions, RemoveOptions, RemoveReport,
    WriteOptions,
};

/// An immutable working-directory context.
///
/// A `Workdir` anchors relative paths to one absolute root; absolute
/// arguments pass through untouched. Deriving a nested context with
/// [`Workdir::cwd`] returns a new value, so a context handed to other
/// code can never be re-rooted behind its back.
///
/// The root does not have to exist. Operations that need it will say
/// so in their usual way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workdir {
    root: PathBuf,
}

impl Workdir {
    /// Anchor a context at a path, resolved against the process
    /// working directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, FsError> {
        Ok(Self {
            root: absolutize(root.as_ref())?,
        })
    }

    /// Absolute root of this context.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a path against this context's root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Derive a context anchored below (or beside) this one.
    pub fn cwd(&self, path: impl AsRef<Path>) -> Self {
        Self {
            root: self.resolve(path),
        }
    }

    // Inspection

    /// Describe a single entry, `Ok(None)` when nothing is there.
    pub fn inspect(
        &self,
        path: impl AsRef<Path>,
        options: &InspectOptions,
    ) -> Result<Option<Descriptor>, FsError> {
        duffel_inspect::inspect(self.resolve(path), options)
    }

    /// Async twin of [`Workdir::inspect`].
    pub async fn inspect_async(
        &self,
        path: impl AsRef<Path>,
        options: InspectOptions,
    ) -> Result<Option<Descriptor>, FsError> {
        duffel_inspect::inspect_async(self.resolve(path), options).await
    }

    /// Check what occupies a path, if anything.
    pub fn exists(&self, path: impl AsRef<Path>) -> Result<Option<Existence>, FsError> {
        duffel_inspect::exists(self.resolve(path))
    }

    /// Async twin of [`Workdir::exists`].
    pub async fn exists_async(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<Existence>, FsError> {
        duffel_inspect::exists_async(self.resolve(path)).await
    }

    /// Sorted child names of a directory, `Ok(None)` when missing.
    pub fn list(&self, path: impl AsRef<Path>) -> Result<Option<Vec<String>>, FsError> {
        duffel_inspect::list(self.resolve(path))
    }

    /// Async twin of [`Workdir::list`].
    pub async fn list_async(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<Vec<String>>, FsError> {
        duffel_inspect::list_async(self.resolve(path)).await
    }

    /// File content as UTF-8, `Ok(None)` when missing.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Option<String>, FsError> {
        duffel_inspect::read(self.resolve(path))
    }

    /// Async twin of [`Workdir::read`].
    pub async fn read_async(&self, path: impl AsRef<Path>) -> Result<Option<String>, FsError> {
        duffel_inspect::read_async(self.resolve(path)).await
    }

    /// Raw file content, `Ok(None)` when missing.
    pub fn read_bytes(&self, path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, FsError> {
        duffel_inspect::read_bytes(self.resolve(path))
    }

    /// Async twin of [`Workdir::read_bytes`].
    pub async fn read_bytes_async(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<Vec<u8>>, FsError> {
        duffel_inspect::read_bytes_async(self.resolve(path)).await
    }

    /// Deserialize a JSON file, `Ok(None)` when missing.
    pub fn read_json<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<T>, FsError> {
        duffel_inspect::read_json(self.resolve(path))
    }

    /// Async twin of [`Workdir::read_json`].
    pub async fn read_json_async<T: DeserializeOwned + Send + 'static>(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Option<T>, FsError> {
        duffel_inspect::read_json_async(self.resolve(path)).await
    }

    /// Describe a whole subtree, `Ok(None)` when the root is missing.
    pub fn tree(
        &self,
        path: impl AsRef<Path>,
        options: &TreeOptions,
    ) -> Result<Option<TreeEntry>, FsError> {
        duffel_inspect::inspect_tree(self.resolve(path), options)
    }

    /// Async twin of [`Workdir::tree`].
    pub async fn tree_async(
        &self,
        path: impl AsRef<Path>,
        options: TreeOptions,
    ) -> Result<Option<TreeEntry>, FsError> {
        duffel_inspect::inspect_tree_async(self.resolve(path), options).await
    }

    /// Find entries below a directory matching glob patterns.
    pub fn find(
        &self,
        path: impl AsRef<Path>,
        options: &FindOptions,
    ) -> Result<Vec<PathBuf>, FsError> {
        duffel_inspect::find(self.resolve(path), options)
    }

    /// Async twin of [`Workdir::find`].
    pub async fn find_async(
        &self,
        path: impl AsRef<Path>,
        options: FindOptions,
    ) -> Result<Vec<PathBuf>, FsError> {
        duffel_inspect::find_async(self.resolve(path), options).await
    }

    /// Depth-first pre-order iterator over a subtree.
    pub fn walk(&self, path: impl AsRef<Path>, options: WalkOptions) -> Walker {
        Walker::new(self.resolve(path), options)
    }

    /// Stream a traversal through a bounded channel.
    pub fn walk_stream(
        &self,
        path: impl AsRef<Path>,
        options: WalkOptions,
    ) -> ReceiverStream<Result<WalkItem, FsError>> {
        duffel_inspect::walk_stream(self.resolve(path), options)
    }

    // Mutation

    /// Write a file, creating missing ancestors.
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        options: &WriteOptions,
    ) -> Result<(), FsError> {
        duffel_ops::write(self.resolve(path), content, options)
    }

    /// Async twin of [`Workdir::write`].
    pub async fn write_async(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Vec<u8>>,
        options: WriteOptions,
    ) -> Result<(), FsError> {
        duffel_ops::write_async(self.resolve(path), content, options).await
    }

    /// Serialize a value as pretty JSON and write it.
    pub fn write_json<T: Serialize>(
        &self,
        path: impl AsRef<Path>,
        value: &T,
        options: &WriteOptions,
    ) -> Result<(), FsError> {
        duffel_ops::write_json(self.resolve(path), value, options)
    }

    /// Async twin of [`Workdir::write_json`].
    pub async fn write_json_async<T: Serialize>(
        &self,
        path: impl AsRef<Path>,
        value: &T,
        options: WriteOptions,
    ) -> Result<(), FsError> {
        duffel_ops::write_json_async(self.resolve(path), value, options).await
    }

    /// Append to a file, creating it as needed.
    pub fn append(
        &self,
        path: impl AsRef<Path>,
        content: impl AsRef<[u8]>,
        mode: Option<u32>,
    ) -> Result<(), FsError> {
        duffel_ops::append(self.resolve(path), content, mode)
    }

    /// Async twin of [`Workdir::append`].
    pub async fn append_async(
        &self,
        path: impl AsRef<Path>,
        content: impl Into<Vec<u8>>,
        mode: Option<u32>,
    ) -> Result<(), FsError> {
        duffel_ops::append_async(self.resolve(path), content, mode).await
    }

    /// Ensure a directory exists and return a context anchored at it.
    pub fn dir(
        &self,
        path: impl AsRef<Path>,
        options: &DirOptions,
    ) -> Result<Workdir, FsError> {
        let root = self.resolve(path);
        duffel_ops::ensure_dir(&root, options)?;
        Ok(Workdir { root })
    }

    /// Async twin of [`Workdir::dir`].
    pub async fn dir_async(
        &self,
        path: impl AsRef<Path>,
        options: DirOptions,
    ) -> Result<Workdir, FsError> {
        let root = self.resolve(path);
        duffel_ops::ensure_dir_async(root.clone(), options).await?;
        Ok(Workdir { root })
    }

    /// Ensure a file exists with the requested content and mode.
    pub fn file(&self, path: impl AsRef<Path>, options: &FileOptions) -> Result<(), FsError> {
        duffel_ops::ensure_file(self.resolve(path), options)
    }

    /// Async twin of [`Workdir::file`].
    pub async fn file_async(
        &self,
        path: impl AsRef<Path>,
        options: FileOptions,
    ) -> Result<(), FsError> {
        duffel_ops::ensure_file_async(self.resolve(path), options).await
    }

    /// Create a symlink at `path`. The target is stored verbatim, not
    /// resolved against the context.
    pub fn symlink(
        &self,
        target: impl AsRef<Path>,
        path: impl AsRef<Path>,
    ) -> Result<(), FsError> {
        duffel_ops::symlink(target, self.resolve(path))
    }

    /// Async twin of [`Workdir::symlink`].
    pub async fn symlink_async(
        &self,
        target: impl AsRef<Path>,
        path: impl AsRef<Path>,
    ) -> Result<(), FsError> {
        duffel_ops::symlink_async(target.as_ref().to_path_buf(), self.resolve(path)).await
    }

    /// Copy a tree, blocking.
    pub fn copy(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: CopyOptions,
    ) -> Result<CopyReport, FsError> {
        duffel_ops::copy(self.resolve(from), self.resolve(to), options)
    }

    /// Copy a tree on the async runtime, settling conflicts through
    /// the configured resolver.
    pub async fn copy_async(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: CopyOptions,
    ) -> Result<CopyReport, FsError> {
        duffel_ops::copy_async(self.resolve(from), self.resolve(to), options).await
    }

    /// Remove whatever occupies a path, blocking.
    pub fn remove(
        &self,
        path: impl AsRef<Path>,
        options: &RemoveOptions,
    ) -> Result<RemoveReport, FsError> {
        duffel_ops::remove(self.resolve(path), options)
    }

    /// Async twin of [`Workdir::remove`].
    pub async fn remove_async(
        &self,
        path: impl AsRef<Path>,
        options: RemoveOptions,
    ) -> Result<RemoveReport, FsError> {
        duffel_ops::remove_async(self.resolve(path), options).await
    }

    /// Move an entry, falling back to copy plus remove across devices.
    pub fn move_path(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: &MoveOptions,
    ) -> Result<(), FsError> {
        duffel_ops::move_path(self.resolve(from), self.resolve(to), options)
    }

    /// Async twin of [`Workdir::move_path`].
    pub async fn move_path_async(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        options: MoveOptions,
    ) -> Result<(), FsError> {
        duffel_ops::move_path_async(self.resolve(from), self.resolve(to), options).await
    }

    /// Give an entry a new name in place.
    pub fn rename(&self, path: impl AsRef<Path>, new_name: &str) -> Result<(), FsError> {
        duffel_ops::rename(self.resolve(path), new_name)
    }

    /// Async twin of [`Workdir::rename`].
    pub async fn rename_async(
        &self,
        path: impl AsRef<Path>,
        new_name: &str,
    ) -> Result<(), FsError> {
        duffel_ops::rename_async(self.resolve(path), new_name).await
    }
}
