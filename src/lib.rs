//! duffel - a filesystem convenience toolkit.
//!
//! duffel wraps everyday filesystem work in one coherent API: describe
//! entries and whole subtrees, list and read, search with globs, walk
//! depth-first as an iterator or a stream, and mutate with write,
//! copy, move and remove engines that exist in blocking and async
//! flavors. The async engines report progress through callbacks and
//! settle conflicts through a pluggable resolver.
//!
//! Two ways in:
//!
//! - **Free functions** re-exported here, taking explicit paths.
//! - **[`Workdir`]**, an immutable context that anchors relative paths
//!   to one root.
//!
//! # Example
//!
//! ```rust,no_run
//! use duffel::{CopyOptions, WriteOptions, Workdir};
//!
//! fn main() -> Result<(), duffel::FsError> {
//!     let project = Workdir::new("./project")?;
//!     project.write("notes/todo.txt", "ship it", &WriteOptions::default())?;
//!
//!     let report = project.copy("notes", "backup", CopyOptions::new().with_overwrite(true))?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! Absent paths are values, not errors: lookups return `Ok(None)`, and
//! removing something that is not there succeeds.

mod context;

pub use context::Workdir;

// Re-export the member crates' API so `duffel` alone is enough.
pub use duffel_core::{
    Checksum, ChecksumAlgo, Descriptor, EntryKind, ErrorKind, Existence, FsError, Matcher,
    Timestamps, absolutize, format_mode, normalize_mode, parse_mode,
};
pub use duffel_inspect::{
    FindOptions, FindOptionsBuilder, InspectOptions, InspectOptionsBuilder, SymlinkMode,
    TreeEntry, TreeOptions, TreeOptionsBuilder, WALK_CHANNEL_SIZE, WalkItem, WalkOptions,
    WalkOptionsBuilder, Walker, exists, exists_async, find, find_async, inspect, inspect_async,
    inspect_tree, inspect_tree_async, list, list_async, read, read_async, read_bytes,
    read_bytes_async, read_json, read_json_async, walk, walk_stream,
};
pub use duffel_ops::{
    BYTE_PROGRESS_INTERVAL, BYTE_PROGRESS_THRESHOLD, ByteProgress, ConflictAction,
    ConflictRecord, ConflictResolver, CopyOptions, CopyReport, DirOptions, FileOptions,
    ItemProgress, MoveOptions, RemoveOptions, RemoveReport, Resolution, ResolutionScope,
    ResolveFuture, WriteOptions, append, append_async, copy, copy_async, ensure_dir,
    ensure_dir_async, ensure_file, ensure_file_async, move_path, move_path_async, remove,
    remove_async, rename, rename_async, symlink, symlink_async, write, write_async, write_json,
    write_json_async,
};
