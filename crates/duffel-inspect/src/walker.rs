//! Depth-first tree traversal.
//!
//! [`Walker`] is a pull-based iterator: nothing is read ahead of
//! demand, and each pulse costs at most one inspect plus one directory
//! listing. [`walk_stream`] bridges it onto the async runtime through a
//! bounded channel, so backpressure from the consumer throttles the
//! producer.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace};

use duffel_core::{Descriptor, EntryKind, FsError};

use crate::inspect::{InspectOptions, SymlinkMode, inspect};

/// Buffer between the walk producer and an async consumer.
pub const WALK_CHANNEL_SIZE: usize = 64;

/// Options controlling a traversal.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
#[builder(setter(into), default)]
pub struct WalkOptions {
    /// Deepest level to descend to; the root is level 0 and `None`
    /// means unbounded.
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// What to collect for each visited entry. Symlink handling is
    /// forced to [`SymlinkMode::Report`] so traversal never follows
    /// links into cycles.
    #[serde(default)]
    pub inspect: InspectOptions,
}

impl WalkOptions {
    /// Create an options builder.
    pub fn builder() -> WalkOptionsBuilder {
        WalkOptionsBuilder::default()
    }
}

/// One visited entry.
#[derive(Debug, Clone)]
pub struct WalkItem {
    /// Path of the entry, rooted wherever the traversal started.
    pub path: PathBuf,
    /// Depth below the root; the root itself is 0.
    pub depth: u32,
    /// Descriptor of the entry. `None` only for a root that does not
    /// exist.
    pub entry: Option<Descriptor>,
}

/// Unvisited remainder of one directory.
#[derive(Debug)]
struct DirectoryState {
    fs_path: PathBuf,
    entries: Vec<OsString>,
    index: usize,
    depth: u32,
}

impl DirectoryState {
    fn new(fs_path: PathBuf, depth: u32) -> Result<Self, FsError> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&fs_path).map_err(|e| FsError::io(&fs_path, e))?;
        for entry in read_dir {
            let entry = entry.map_err(|e| FsError::io(&fs_path, e))?;
            entries.push(entry.file_name());
        }
        entries.sort();

        trace!(path = %fs_path.display(), count = entries.len(), "listed directory");

        Ok(Self {
            fs_path,
            entries,
            index: 0,
            depth,
        })
    }

    fn next_name(&mut self) -> Option<OsString> {
        if let Some(name) = self.entries.get(self.index) {
            self.index += 1;
            Some(name.clone())
        } else {
            None
        }
    }
}

/// Depth-first pre-order iterator over a subtree.
///
/// The root is yielded first, and every directory strictly before its
/// children. Siblings come in sorted name order. The first error ends
/// the traversal; the iterator is fused afterwards.
pub struct Walker {
    root: PathBuf,
    max_depth: Option<u32>,
    inspect: InspectOptions,
    yielded_root: bool,
    stack: Vec<DirectoryState>,
    finished: bool,
}

impl Walker {
    /// Create a walker. No filesystem work happens until the first
    /// pulse.
    pub fn new(root: impl Into<PathBuf>, options: WalkOptions) -> Self {
        let mut inspect = options.inspect;
        inspect.symlinks = SymlinkMode::Report;
        Self {
            root: root.into(),
            max_depth: options.max_depth,
            inspect,
            yielded_root: false,
            stack: Vec::new(),
            finished: false,
        }
    }

    /// The path the traversal starts from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Push a directory's listing when the entry is one and the depth
    /// budget allows descending into it.
    fn enter(&mut self, path: &Path, depth: u32, kind: EntryKind) -> Result<(), FsError> {
        if kind != EntryKind::Dir {
            return Ok(());
        }
        if let Some(max) = self.max_depth {
            if depth >= max {
                return Ok(());
            }
        }
        let state = DirectoryState::new(path.to_path_buf(), depth)?;
        self.stack.push(state);
        Ok(())
    }

    fn fail(&mut self, error: FsError) -> Option<Result<WalkItem, FsError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for Walker {
    type Item = Result<WalkItem, FsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.yielded_root {
            self.yielded_root = true;
            debug!(root = %self.root.display(), "starting traversal");
            let entry = match inspect(&self.root, &self.inspect) {
                Ok(entry) => entry,
                Err(e) => return self.fail(e),
            };
            let Some(entry) = entry else {
                // A missing root is reported, not an error.
                self.finished = true;
                return Some(Ok(WalkItem {
                    path: self.root.clone(),
                    depth: 0,
                    entry: None,
                }));
            };
            let root = self.root.clone();
            if let Err(e) = self.enter(&root, 0, entry.kind) {
                return self.fail(e);
            }
            return Some(Ok(WalkItem {
                path: root,
                depth: 0,
                entry: Some(entry),
            }));
        }

        loop {
            let (path, depth) = {
                let state = self.stack.last_mut()?;
                if let Some(name) = state.next_name() {
                    (state.fs_path.join(&name), state.depth + 1)
                } else {
                    self.stack.pop();
                    continue;
                }
            };

            match inspect(&path, &self.inspect) {
                Ok(Some(entry)) => {
                    if let Err(e) = self.enter(&path, depth, entry.kind) {
                        return self.fail(e);
                    }
                    return Some(Ok(WalkItem {
                        path,
                        depth,
                        entry: Some(entry),
                    }));
                }
                // Listed a moment ago but gone now. Surfacing the race
                // keeps the contract that nothing is silently skipped.
                Ok(None) => return self.fail(FsError::not_found(path)),
                Err(e) => return self.fail(e),
            }
        }
    }
}

/// Walk a subtree depth-first, invoking `visitor` for every entry.
///
/// The root comes first (with `None` when it does not exist), then
/// each descendant in pre-order.
pub fn walk<F>(root: impl Into<PathBuf>, options: &WalkOptions, mut visitor: F) -> Result<(), FsError>
where
    F: FnMut(&Path, Option<&Descriptor>),
{
    for item in Walker::new(root, options.clone()) {
        let item = item?;
        visitor(&item.path, item.entry.as_ref());
    }
    Ok(())
}

/// Stream a traversal through a bounded channel.
///
/// The producer runs on the blocking pool and advances only as fast as
/// the consumer drains the channel. Dropping the stream stops the
/// producer at its next send.
pub fn walk_stream(
    root: impl Into<PathBuf>,
    options: WalkOptions,
) -> ReceiverStream<Result<WalkItem, FsError>> {
    let (tx, rx) = mpsc::channel(WALK_CHANNEL_SIZE);
    let root = root.into();
    tokio::task::spawn_blocking(move || {
        for item in Walker::new(root, options) {
            let last = item.is_err();
            if tx.blocking_send(item).is_err() {
                debug!("walk consumer dropped, stopping traversal");
                break;
            }
            if last {
                break;
            }
        }
    });
    ReceiverStream::new(rx)
}
