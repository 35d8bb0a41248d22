//! Progress reporting for file operations.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use duffel_core::Descriptor;

use crate::conflict::ConflictRecord;

/// Item-level progress, delivered after each entry settles.
#[derive(Debug, Clone)]
pub struct ItemProgress {
    /// Path of the item that settled (the destination, for copies).
    pub path: PathBuf,
    /// Items settled so far, this one included.
    pub done: usize,
    /// Total item count, when a pre-pass counted it.
    pub total: Option<usize>,
    /// Descriptor of the source entry.
    pub entry: Descriptor,
}

/// Byte-level progress for one large file body.
#[derive(Debug, Clone)]
pub struct ByteProgress {
    /// Destination path of the file being written.
    pub path: PathBuf,
    /// Bytes written so far.
    pub transferred: u64,
    /// Expected total, from the source's size at discovery.
    pub total: u64,
}

/// Item callback. Returning `false` requests a cooperative abort.
pub type ItemHandler = Box<dyn FnMut(&ItemProgress) -> bool + Send>;

/// Byte callback, fired for file bodies above the size threshold.
pub type ByteHandler = Box<dyn FnMut(&ByteProgress) + Send>;

/// Rate limiter for byte callbacks: at most one call per interval,
/// with the final report always let through.
#[derive(Debug)]
pub(crate) struct ByteTicker {
    interval: Duration,
    last: Option<Instant>,
}

impl ByteTicker {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn ready(&mut self) -> bool {
        match self.last {
            Some(at) if at.elapsed() < self.interval => false,
            _ => {
                self.last = Some(Instant::now());
                true
            }
        }
    }
}

/// Outcome of a copy call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyReport {
    /// Entries written: files, directories and symlinks.
    pub copied: usize,
    /// Entries left alone by a resolution or a comparison action.
    pub skipped: usize,
    /// File bytes written.
    pub bytes_copied: u64,
    /// Whether the call stopped early on request.
    pub aborted: bool,
    /// Handled conflicts, collected in reporting mode only.
    pub records: Vec<ConflictRecord>,
}

impl CopyReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "copied {} ({} bytes), skipped {}",
            self.copied, self.bytes_copied, self.skipped
        );
        if self.aborted {
            s.push_str(", aborted");
        }
        s
    }
}

/// Outcome of a remove call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveReport {
    /// Entries unlinked (or trashed).
    pub removed: usize,
    /// Entries left in place by a resolution.
    pub skipped: usize,
    /// Whether the call stopped early on request.
    pub aborted: bool,
    /// Handled conflicts, collected in reporting mode only.
    pub records: Vec<ConflictRecord>,
}

impl RemoveReport {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        let mut s = format!("removed {}, skipped {}", self.removed, self.skipped);
        if self.aborted {
            s.push_str(", aborted");
        }
        s
    }
}
