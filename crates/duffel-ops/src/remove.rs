//! Tree removal engine.
//!
//! Removal is idempotent: a path nobody occupies is already removed.
//! The async engine deletes the children of each directory
//! concurrently on a [`JoinSet`] and offers permission and
//! non-empty-directory failures to the configured resolver; a skipped
//! child naturally surfaces as a non-empty conflict on its parent.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use duffel_core::{Descriptor, EntryKind, ErrorKind, FsError};
use duffel_inspect::{InspectOptions, SymlinkMode, inspect};

use crate::conflict::{ConflictAction, ConflictRecord, ConflictResolver, Resolution, SharedResolver};
use crate::copy::{occupied, occupied_kind};
use crate::progress::RemoveReport;
use crate::write::run_blocking;

/// Options for [`remove`] and [`remove_async`].
///
/// The resolver matters only to the async engine.
#[derive(Default)]
pub struct RemoveOptions {
    use_trash: bool,
    report: bool,
    resolution: Option<Resolution>,
    resolver: Option<SharedResolver>,
}

impl std::fmt::Debug for RemoveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoveOptions")
            .field("use_trash", &self.use_trash)
            .field("report", &self.report)
            .field("resolution", &self.resolution)
            .field("resolver", &self.resolver.as_ref().map(|_| "..."))
            .finish()
    }
}

impl RemoveOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the entry to the platform trash instead of deleting it.
    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    /// Collect handled conflicts into the report instead of dropping
    /// them (async engine).
    pub fn with_reporting(mut self, report: bool) -> Self {
        self.report = report;
        self
    }

    /// Static resolution applied to every conflict without consulting
    /// a resolver (async engine).
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Resolver consulted per conflict (async engine).
    pub fn with_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn trash_delete(path: &Path) -> Result<(), FsError> {
    trash::delete(path).map_err(|e| FsError::io(path, std::io::Error::other(e)))
}

/// Remove whatever occupies the path, blocking.
///
/// Files and symlinks are unlinked, directories are removed with their
/// contents. A vacant path is a success with nothing counted. Conflict
/// resolution is an async-engine concern; here the first error ends
/// the call.
pub fn remove(path: impl AsRef<Path>, options: &RemoveOptions) -> Result<RemoveReport, FsError> {
    let path = path.as_ref();
    let mut report = RemoveReport::default();
    if options.use_trash {
        if occupied(path)? {
            debug!(path = %path.display(), "moving to trash");
            trash_delete(path)?;
            report.removed = 1;
        }
        return Ok(report);
    }
    report.removed = remove_tree(path)?;
    Ok(report)
}

/// Remove a subtree bottom-up, counting unlinked entries. Entries that
/// vanish mid-removal are treated as already gone.
fn remove_tree(path: &Path) -> Result<usize, FsError> {
    let Some(kind) = occupied_kind(path)? else {
        return Ok(0);
    };
    if kind != EntryKind::Dir {
        return Ok(usize::from(unlink(path, false)?));
    }
    let mut count = 0;
    let entries = fs::read_dir(path).map_err(|e| FsError::io(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FsError::io(path, e))?;
        count += remove_tree(&entry.path())?;
    }
    count += usize::from(unlink(path, true)?);
    Ok(count)
}

/// One unlink attempt; `Ok(false)` means the entry was already gone.
fn unlink(path: &Path, is_dir: bool) -> Result<bool, FsError> {
    let result = if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Shared state of one async removal.
struct RemoveCtx {
    cancel: CancellationToken,
    cache: Mutex<Option<Resolution>>,
    resolver: Option<SharedResolver>,
    report: bool,
    records: Mutex<Vec<ConflictRecord>>,
    removed: AtomicUsize,
    skipped: AtomicUsize,
}

impl RemoveCtx {
    /// Consult the cache, then the resolver. `None` propagates the
    /// original error.
    async fn decide(
        &self,
        path: &Path,
        entry: Option<&Descriptor>,
        error: ErrorKind,
    ) -> Option<Resolution> {
        if let Some(cached) = *lock(&self.cache) {
            return Some(cached);
        }
        let resolver = self.resolver.clone()?;
        let resolution = resolver.resolve(path, entry, error).await;
        trace!(path = %path.display(), %error, action = %resolution.action, "conflict resolved");
        if resolution.applies_to_all() {
            *lock(&self.cache) = Some(resolution);
        }
        Some(resolution)
    }

    fn record(
        &self,
        path: &Path,
        entry: Option<Descriptor>,
        error: ErrorKind,
        resolution: Resolution,
    ) {
        if self.report {
            lock(&self.records).push(ConflictRecord {
                path: path.to_path_buf(),
                entry,
                error,
                resolution,
            });
        }
    }
}

/// Failures the unlink layer offers to the resolver; everything else
/// propagates.
fn intercepts(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::PermissionDenied | ErrorKind::DirectoryNotEmpty
    )
}

async fn probe(path: &Path) -> Option<Descriptor> {
    let path = path.to_path_buf();
    run_blocking(path.clone(), move || {
        inspect(
            &path,
            &InspectOptions {
                times: true,
                symlinks: SymlinkMode::Report,
                ..Default::default()
            },
        )
    })
    .await
    .ok()
    .flatten()
}

/// Remove whatever occupies the path on the async runtime.
///
/// Directory children are removed concurrently; intercepted failures
/// consult the configured resolver. Without a resolver or static
/// resolution, the first failure ends the call.
pub async fn remove_async(
    path: impl Into<PathBuf>,
    options: RemoveOptions,
) -> Result<RemoveReport, FsError> {
    let path = path.into();
    if options.use_trash {
        let target = path.clone();
        let existed = run_blocking(path, move || {
            if occupied(&target)? {
                debug!(path = %target.display(), "moving to trash");
                trash_delete(&target)?;
                Ok(true)
            } else {
                Ok(false)
            }
        })
        .await?;
        return Ok(RemoveReport {
            removed: usize::from(existed),
            ..Default::default()
        });
    }

    let ctx = Arc::new(RemoveCtx {
        cancel: CancellationToken::new(),
        cache: Mutex::new(options.resolution),
        resolver: options.resolver,
        report: options.report,
        records: Mutex::new(Vec::new()),
        removed: AtomicUsize::new(0),
        skipped: AtomicUsize::new(0),
    });

    remove_entry(ctx.clone(), path).await?;

    Ok(RemoveReport {
        removed: ctx.removed.load(Ordering::SeqCst),
        skipped: ctx.skipped.load(Ordering::SeqCst),
        aborted: ctx.cancel.is_cancelled(),
        records: std::mem::take(&mut *lock(&ctx.records)),
    })
}

/// Recursive removal of one entry. Boxed because the future recurses
/// through spawned children.
fn remove_entry(
    ctx: Arc<RemoveCtx>,
    path: PathBuf,
) -> Pin<Box<dyn Future<Output = Result<(), FsError>> + Send>> {
    Box::pin(async move {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let probe_path = path.clone();
        let Some(kind) = run_blocking(path.clone(), move || occupied_kind(&probe_path)).await?
        else {
            return Ok(());
        };

        if kind == EntryKind::Dir {
            let list_path = path.clone();
            let children = run_blocking(path.clone(), move || {
                let mut children = Vec::new();
                let entries = fs::read_dir(&list_path).map_err(|e| FsError::io(&list_path, e))?;
                for entry in entries {
                    let entry = entry.map_err(|e| FsError::io(&list_path, e))?;
                    children.push(entry.path());
                }
                Ok(children)
            })
            .await?;

            let mut set = JoinSet::new();
            for child in children {
                set.spawn(remove_entry(ctx.clone(), child));
            }
            // Drain every child before propagating, so no task keeps
            // working against a tree the caller thinks settled.
            let mut first_err: Option<FsError> = None;
            while let Some(joined) = set.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(FsError::io(path.clone(), std::io::Error::other(e))),
                };
                if let Err(e) = outcome {
                    first_err.get_or_insert(e);
                }
            }
            if let Some(e) = first_err {
                return Err(e);
            }
        }

        unlink_settled(&ctx, &path, kind == EntryKind::Dir).await
    })
}

/// Unlink one entry, looping failures through the resolver.
async fn unlink_settled(ctx: &RemoveCtx, path: &Path, is_dir: bool) -> Result<(), FsError> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(());
        }
        let target = path.to_path_buf();
        let attempt = run_blocking(target.clone(), move || unlink(&target, is_dir)).await;
        let err = match attempt {
            Ok(true) => {
                ctx.removed.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            Ok(false) => return Ok(()),
            Err(err) => err,
        };
        let kind = err.kind();
        if !intercepts(kind) {
            return Err(err);
        }
        let entry = probe(path).await;
        let Some(resolution) = ctx.decide(path, entry.as_ref(), kind).await else {
            return Err(err);
        };
        match resolution.action {
            ConflictAction::Retry => continue,
            ConflictAction::Skip => {
                ctx.record(path, entry, kind, resolution);
                ctx.skipped.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            ConflictAction::Abort => {
                ctx.record(path, entry, kind, resolution);
                ctx.cancel.cancel();
                return Ok(());
            }
            ConflictAction::Throw => return Err(err),
            // Overwrite and the comparison answers do not apply to a
            // failed unlink.
            ConflictAction::Overwrite
            | ConflictAction::Append
            | ConflictAction::IfNewer
            | ConflictAction::IfSizeDiffers => {
                return Err(FsError::invalid_input(format!(
                    "resolution {} cannot settle a {} failure at {}",
                    resolution.action,
                    kind,
                    path.display()
                )));
            }
        }
    }
}
