//! Conflict detection and resolution.
//!
//! The engines raise a conflict in two situations: the destination of
//! a copy is already occupied, or an item-level I/O failure of an
//! interceptable class (permission denied, directory not empty) is
//! hit mid-operation. A [`ConflictResolver`] answers with what to do
//! and how far the answer reaches.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use duffel_core::{Descriptor, ErrorKind};

/// What to do about one conflicting item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictAction {
    /// Leave the item alone and move on.
    #[default]
    Skip,
    /// Replace whatever occupies the destination.
    Overwrite,
    /// Overwrite only when the source is at least as recently
    /// modified as the destination. Source directories always proceed.
    IfNewer,
    /// Overwrite only when the file sizes differ.
    IfSizeDiffers,
    /// Append the source file's content to the destination file.
    Append,
    /// Fail the whole operation with the originating error.
    Throw,
    /// Attempt the same item again. There is no retry cap; a static
    /// retry against a persistent error will spin.
    Retry,
    /// Stop the operation early; whatever already settled stays.
    Abort,
}

impl fmt::Display for ConflictAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
            Self::IfNewer => "if-newer",
            Self::IfSizeDiffers => "if-size-differs",
            Self::Append => "append",
            Self::Throw => "throw",
            Self::Retry => "retry",
            Self::Abort => "abort",
        };
        write!(f, "{name}")
    }
}

/// How far a resolution reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionScope {
    /// The current item only.
    #[default]
    ThisItem,
    /// This and every later conflict in the same call; the resolver is
    /// not consulted again.
    AllItems,
}

/// A resolver's answer to one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Resolution {
    /// The action to take.
    pub action: ConflictAction,
    /// How far the action reaches.
    pub scope: ResolutionScope,
}

impl Resolution {
    /// An answer for the current item only.
    pub fn one(action: ConflictAction) -> Self {
        Self {
            action,
            scope: ResolutionScope::ThisItem,
        }
    }

    /// An answer for this and every later conflict in the call.
    pub fn all(action: ConflictAction) -> Self {
        Self {
            action,
            scope: ResolutionScope::AllItems,
        }
    }

    /// Whether this answer covers later conflicts too.
    pub fn applies_to_all(&self) -> bool {
        self.scope == ResolutionScope::AllItems
    }
}

/// Future returned by [`ConflictResolver::resolve`].
pub type ResolveFuture = Pin<Box<dyn Future<Output = Resolution> + Send>>;

/// Decides what to do when an item conflicts or fails.
///
/// `path` is the conflicting destination (copy) or the failing entry
/// (remove); `entry` is a fresh descriptor of that path when one could
/// be taken; `error` classifies what went wrong, `AlreadyExists` for
/// plain destination conflicts. The returned future is awaited without
/// a timeout, so a resolver that never answers stalls its item.
///
/// The future cannot borrow from the arguments; clone what the answer
/// needs.
pub trait ConflictResolver: Send + Sync {
    /// Produce a resolution for one conflict.
    fn resolve(&self, path: &Path, entry: Option<&Descriptor>, error: ErrorKind) -> ResolveFuture;
}

/// A fixed resolution is a resolver that always gives the same answer.
impl ConflictResolver for Resolution {
    fn resolve(&self, _path: &Path, _entry: Option<&Descriptor>, _error: ErrorKind) -> ResolveFuture {
        let resolution = *self;
        Box::pin(async move { resolution })
    }
}

/// Plain functions work as resolvers for answers that need no awaiting.
impl<F> ConflictResolver for F
where
    F: Fn(&Path, Option<&Descriptor>, ErrorKind) -> Resolution + Send + Sync,
{
    fn resolve(&self, path: &Path, entry: Option<&Descriptor>, error: ErrorKind) -> ResolveFuture {
        let resolution = self(path, entry, error);
        Box::pin(async move { resolution })
    }
}

/// One handled conflict, collected when reporting mode is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Path the conflict occurred at.
    pub path: PathBuf,
    /// Descriptor of the conflicting entry, when one could be taken.
    pub entry: Option<Descriptor>,
    /// What went wrong.
    pub error: ErrorKind,
    /// How it was resolved.
    pub resolution: Resolution,
}

/// Shared handle to a resolver.
pub(crate) type SharedResolver = Arc<dyn ConflictResolver>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_resolution_is_a_resolver() {
        let resolver = Resolution::all(ConflictAction::Overwrite);
        let answer = resolver
            .resolve(Path::new("/x"), None, ErrorKind::AlreadyExists)
            .await;
        assert_eq!(answer.action, ConflictAction::Overwrite);
        assert!(answer.applies_to_all());
    }

    #[tokio::test]
    async fn test_closure_resolver_sees_arguments() {
        let resolver = |path: &Path, _entry: Option<&Descriptor>, error: ErrorKind| {
            if error == ErrorKind::AlreadyExists && path.ends_with("keep.txt") {
                Resolution::one(ConflictAction::Skip)
            } else {
                Resolution::one(ConflictAction::Overwrite)
            }
        };
        let keep = resolver
            .resolve(Path::new("/d/keep.txt"), None, ErrorKind::AlreadyExists)
            .await;
        assert_eq!(keep.action, ConflictAction::Skip);
        let other = resolver
            .resolve(Path::new("/d/other.txt"), None, ErrorKind::AlreadyExists)
            .await;
        assert_eq!(other.action, ConflictAction::Overwrite);
    }

    #[test]
    fn test_default_resolution_is_skip_this_item() {
        let r = Resolution::default();
        assert_eq!(r.action, ConflictAction::Skip);
        assert_eq!(r.scope, ResolutionScope::ThisItem);
        assert!(!r.applies_to_all());
    }

    #[test]
    fn test_action_display() {
        assert_eq!(ConflictAction::IfSizeDiffers.to_string(), "if-size-differs");
        assert_eq!(ConflictAction::Abort.to_string(), "abort");
    }
}
