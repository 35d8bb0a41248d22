//! Mutating filesystem operations for duffel.
//!
//! This crate provides writes, tree copy, move/rename and removal in
//! blocking and async flavors. The async engines report progress
//! through callbacks and settle conflicts through a pluggable
//! [`ConflictResolver`].

mod conflict;
mod copy;
mod move_op;
mod progress;
mod remove;
mod write;

pub use conflict::{
    ConflictAction, ConflictRecord, ConflictResolver, Resolution, ResolutionScope, ResolveFuture,
};
pub use copy::{BYTE_PROGRESS_INTERVAL, BYTE_PROGRESS_THRESHOLD, CopyOptions, copy, copy_async};
pub use move_op::{MoveOptions, move_path, move_path_async, rename, rename_async};
pub use progress::{ByteProgress, CopyReport, ItemProgress, RemoveReport};
pub use remove::{RemoveOptions, remove, remove_async};
pub use write::{
    DirOptions, FileOptions, WriteOptions, append, append_async, ensure_dir, ensure_dir_async,
    ensure_file, ensure_file_async, symlink, symlink_async, write, write_async, write_json,
    write_json_async,
};
