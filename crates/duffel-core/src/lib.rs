//! Core types for duffel.
//!
//! This crate provides the fundamental data structures shared by the
//! duffel crates: entry descriptors, the error taxonomy, glob matching
//! and small path/permission helpers.

mod descriptor;
mod error;
mod matcher;
mod mode;
mod paths;

pub use descriptor::{Checksum, ChecksumAlgo, Descriptor, EntryKind, Existence, Timestamps};
pub use error::{ErrorKind, FsError};
pub use matcher::Matcher;
pub use mode::{format_mode, mode_of, normalize_mode, parse_mode};
pub use paths::absolutize;
