//! Read-side filesystem inspection for duffel.
//!
//! This crate answers "what is at this path?" at three scales: one
//! entry ([`inspect`]), one directory ([`list`]), and a whole subtree
//! ([`Walker`], [`inspect_tree`], [`find`]).
//!
//! # Overview
//!
//! Everything here is non-destructive. Key pieces:
//!
//! - **Single-entry inspection** with opt-in mode, times, checksums
//! - **Pull-based traversal**: a depth-first iterator that does one
//!   inspect and one directory listing per pulse
//! - **Streaming traversal** over a bounded channel for async callers
//! - **Glob search** with ordered, negatable patterns
//!
//! Absent paths are values, not errors: lookups return `Ok(None)` when
//! nothing occupies the path.
//!
//! # Example
//!
//! ```rust,no_run
//! use duffel_inspect::{InspectOptions, inspect, list};
//!
//! let descriptor = inspect("Cargo.toml", &InspectOptions::default()).unwrap();
//! if let Some(d) = descriptor {
//!     println!("{} is {} bytes", d.name, d.size);
//! }
//!
//! for name in list(".").unwrap().unwrap_or_default() {
//!     println!("{name}");
//! }
//! ```
//!
//! # Streaming
//!
//! Traverse a large tree without holding it in memory:
//!
//! ```rust,no_run
//! use duffel_inspect::{WalkOptions, walk_stream};
//! use tokio_stream::StreamExt;
//!
//! # async fn demo() {
//! let mut stream = walk_stream("/big/tree", WalkOptions::default());
//! while let Some(item) = stream.next().await {
//!     let item = item.unwrap();
//!     println!("{} (depth {})", item.path.display(), item.depth);
//! }
//! # }
//! ```

mod find;
mod inspect;
mod list;
mod read;
mod tree;
mod walker;

pub use find::{FindOptions, FindOptionsBuilder, find, find_async};
pub use inspect::{
    InspectOptions, InspectOptionsBuilder, SymlinkMode, exists, exists_async, inspect,
    inspect_async,
};
pub use list::{list, list_async};
pub use read::{read, read_async, read_bytes, read_bytes_async, read_json, read_json_async};
pub use tree::{TreeEntry, TreeOptions, TreeOptionsBuilder, inspect_tree, inspect_tree_async};
pub use walker::{WALK_CHANNEL_SIZE, WalkItem, WalkOptions, WalkOptionsBuilder, Walker, walk, walk_stream};

// Re-export core types for convenience
pub use duffel_core::{
    Checksum, ChecksumAlgo, Descriptor, EntryKind, ErrorKind, Existence, FsError, Matcher,
    Timestamps,
};
