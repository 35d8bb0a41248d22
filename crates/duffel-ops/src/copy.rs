//! Tree copy engine.
//!
//! Both variants traverse the source depth-first in pre-order, so a
//! directory always lands before its children. The blocking [`copy`]
//! knows only the static overwrite policy and fails on the first
//! error. The async [`copy_async`] pulls items from a streaming walk
//! and settles them strictly one at a time, consulting the configured
//! [`ConflictResolver`] for occupied destinations and for intercepted
//! write failures; stopping after N settled items therefore leaves
//! exactly N items at the destination.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use duffel_core::{Descriptor, EntryKind, ErrorKind, FsError, Matcher, Timestamps, absolutize};
use duffel_inspect::{InspectOptions, SymlinkMode, WalkOptions, Walker, inspect, walk_stream};

use crate::conflict::{ConflictAction, ConflictRecord, ConflictResolver, Resolution, SharedResolver};
use crate::progress::{ByteHandler, ByteProgress, ByteTicker, CopyReport, ItemHandler, ItemProgress};
use crate::write::{create_parents, platform_symlink, run_blocking, set_create_mode, set_mode};

/// File bodies strictly larger than this report byte-level progress.
pub const BYTE_PROGRESS_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Default minimum interval between byte-level progress calls.
pub const BYTE_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Chunk size for file bodies.
const COPY_CHUNK: usize = 64 * 1024;

/// Options for [`copy`] and [`copy_async`].
///
/// The resolver and the callbacks matter only to the async engine;
/// the blocking engine honors the flags and the progress callbacks.
pub struct CopyOptions {
    overwrite: bool,
    matching: Option<Vec<String>>,
    preserve_times: bool,
    clean_destination: bool,
    report: bool,
    byte_threshold: u64,
    progress_interval: Duration,
    resolution: Option<Resolution>,
    resolver: Option<SharedResolver>,
    on_item: Option<ItemHandler>,
    on_bytes: Option<ByteHandler>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            matching: None,
            preserve_times: false,
            clean_destination: false,
            report: false,
            byte_threshold: BYTE_PROGRESS_THRESHOLD,
            progress_interval: BYTE_PROGRESS_INTERVAL,
            resolution: None,
            resolver: None,
            on_item: None,
            on_bytes: None,
        }
    }
}

impl std::fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOptions")
            .field("overwrite", &self.overwrite)
            .field("matching", &self.matching)
            .field("preserve_times", &self.preserve_times)
            .field("clean_destination", &self.clean_destination)
            .field("report", &self.report)
            .field("byte_threshold", &self.byte_threshold)
            .field("resolution", &self.resolution)
            .field("resolver", &self.resolver.as_ref().map(|_| "..."))
            .finish_non_exhaustive()
    }
}

impl CopyOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow replacing existing destination entries without consulting
    /// a resolver.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Copy only source entries matching the patterns, see
    /// [`Matcher`]. Ancestor directories of matched entries are
    /// created as needed but not copied as items.
    pub fn with_matching(mut self, patterns: Vec<String>) -> Self {
        self.matching = Some(patterns);
        self
    }

    /// Apply source access/modify times to copied entries.
    pub fn with_preserve_times(mut self, preserve: bool) -> Self {
        self.preserve_times = preserve;
        self
    }

    /// Empty the destination directory once, before copying starts.
    pub fn with_clean_destination(mut self, clean: bool) -> Self {
        self.clean_destination = clean;
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
        self.resolver = Some(std::sync::Arc::new(resolver));
        self
    }

    /// Item-level progress callback; returning `false` aborts after
    /// the current item.
    pub fn with_progress(mut self, f: impl FnMut(&ItemProgress) -> bool + Send + 'static) -> Self {
        self.on_item = Some(Box::new(f));
        self
    }

    /// Byte-level progress callback for large file bodies.
    pub fn with_byte_progress(mut self, f: impl FnMut(&ByteProgress) + Send + 'static) -> Self {
        self.on_bytes = Some(Box::new(f));
        self
    }

    /// Byte threshold above which the byte callback fires.
    pub fn with_byte_threshold(mut self, threshold: u64) -> Self {
        self.byte_threshold = threshold;
        self
    }

    /// Minimum interval between byte callback invocations.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    fn has_conflict_policy(&self) -> bool {
        self.overwrite
            || self.resolution.is_some()
            || self.resolver.is_some()
            || self.clean_destination
    }
}

/// Whether anything occupies a path; symlinks count as occupants.
pub(crate) fn occupied(path: &Path) -> Result<bool, FsError> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FsError::io(path, e)),
    }
}

pub(crate) fn occupied_kind(path: &Path) -> Result<Option<EntryKind>, FsError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            let file_type = metadata.file_type();
            let kind = if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::Other
            };
            Ok(Some(kind))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FsError::io(path, e)),
    }
}

/// Top-level checks shared by the copy and move entry points.
pub(crate) fn precheck(from: &Path, to: &Path, conflicts_handled: bool) -> Result<(), FsError> {
    if !occupied(from)? {
        return Err(FsError::not_found(from));
    }
    let abs_from = absolutize(from)?;
    let abs_to = absolutize(to)?;
    if abs_from == abs_to {
        return Err(FsError::invalid_input(format!(
            "source and destination are the same path: {}",
            abs_from.display()
        )));
    }
    if abs_to.starts_with(&abs_from) {
        return Err(FsError::invalid_input(format!(
            "destination {} is inside source {}",
            abs_to.display(),
            abs_from.display()
        )));
    }
    if !conflicts_handled && occupied(to)? {
        return Err(FsError::already_exists(to));
    }
    Ok(())
}

/// A destination that will be removed or emptied first must not
/// contain the source; the preparation would destroy it.
pub(crate) fn reject_nested_source(from: &Path, to: &Path) -> Result<(), FsError> {
    let abs_from = absolutize(from)?;
    let abs_to = absolutize(to)?;
    if abs_from.starts_with(&abs_to) {
        return Err(FsError::invalid_input(format!(
            "source {} is inside destination {}",
            abs_from.display(),
            abs_to.display()
        )));
    }
    Ok(())
}

fn compile_matcher(from: &Path, options: &CopyOptions) -> Result<Option<Matcher>, FsError> {
    match &options.matching {
        Some(patterns) => Ok(Some(Matcher::compile(absolutize(from)?, patterns)?)),
        None => Ok(None),
    }
}

/// Walk configuration for the engines: mode and times feed
/// preservation and comparison decisions.
fn engine_walk_options() -> WalkOptions {
    WalkOptions {
        max_depth: None,
        inspect: InspectOptions {
            mode: true,
            times: true,
            ..Default::default()
        },
    }
}

fn map_destination(from: &Path, to: &Path, item: &Path) -> Result<PathBuf, FsError> {
    let relative = item.strip_prefix(from).map_err(|_| {
        FsError::invalid_input(format!(
            "{} is not under {}",
            item.display(),
            from.display()
        ))
    })?;
    if relative.as_os_str().is_empty() {
        Ok(to.to_path_buf())
    } else {
        Ok(to.join(relative))
    }
}

fn matches(matcher: Option<&Matcher>, path: &Path) -> Result<bool, FsError> {
    match matcher {
        Some(matcher) => Ok(matcher.matches(&absolutize(path)?)),
        None => Ok(true),
    }
}

/// Count matched items for progress totals. One extra cheap pass, only
/// taken when a progress callback wants totals.
fn count_items(from: &Path, matcher: Option<&Matcher>) -> Result<usize, FsError> {
    let mut count = 0;
    for item in Walker::new(from, WalkOptions::default()) {
        let item = item?;
        if item.entry.is_none() {
            continue;
        }
        if matches(matcher, &item.path)? {
            count += 1;
        }
    }
    Ok(count)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Copied(u64),
    Skipped,
    Aborted,
}

/// Copy `from` onto `to`, blocking.
///
/// Conflict policy is the static `overwrite` flag alone; the first
/// unhandled error ends the call. Progress callbacks get totals from a
/// counting pre-pass.
pub fn copy(
    from: impl AsRef<Path>,
    to: impl AsRef<Path>,
    mut options: CopyOptions,
) -> Result<CopyReport, FsError> {
    let from = from.as_ref();
    let to = to.as_ref();

    precheck(from, to, options.overwrite || options.clean_destination)?;
    if options.clean_destination {
        reject_nested_source(from, to)?;
        crate::write::ensure_dir(
            to,
            &crate::write::DirOptions {
                empty: true,
                mode: None,
            },
        )?;
    }
    let matcher = compile_matcher(from, &options)?;
    let total = match options.on_item {
        Some(_) => Some(count_items(from, matcher.as_ref())?),
        None => None,
    };
    // An emptied destination still leaves its root to merge into.
    let overwrite = options.overwrite || options.clean_destination;

    debug!(from = %from.display(), to = %to.display(), "starting blocking copy");

    let mut report = CopyReport::default();
    let mut dir_times: Vec<(PathBuf, Timestamps)> = Vec::new();
    let mut done = 0usize;

    for item in Walker::new(from, engine_walk_options()) {
        let item = item?;
        let Some(entry) = item.entry else {
            return Err(FsError::not_found(item.path));
        };
        if !matches(matcher.as_ref(), &item.path)? {
            continue;
        }
        let dest = map_destination(from, to, &item.path)?;

        if !overwrite && occupied(&dest)? {
            return Err(FsError::already_exists(dest));
        }
        let outcome = perform(
            &item.path,
            &dest,
            &entry,
            ConflictAction::Overwrite,
            &mut options.on_bytes,
            options.byte_threshold,
            options.progress_interval,
        )?;
        settle_outcome(
            outcome,
            &dest,
            &entry,
            options.preserve_times,
            &mut report,
            &mut dir_times,
        )?;

        done += 1;
        if let Some(on_item) = options.on_item.as_mut() {
            let keep_going = on_item(&ItemProgress {
                path: dest,
                done,
                total,
                entry,
            });
            if !keep_going {
                debug!("progress callback requested abort");
                report.aborted = true;
                break;
            }
        }
    }

    restore_dir_times(&mut dir_times)?;
    Ok(report)
}

/// Copy `from` onto `to` on the async runtime.
///
/// Filesystem work runs on the blocking pool; items are pulled from a
/// streaming walk with backpressure and settled sequentially in
/// pre-order. Occupied destinations and intercepted write failures
/// consult the configured resolver; without one, the static flags
/// decide.
pub async fn copy_async(
    from: impl Into<PathBuf>,
    to: impl Into<PathBuf>,
    mut options: CopyOptions,
) -> Result<CopyReport, FsError> {
    let from = from.into();
    let to = to.into();

    {
        let (from, to) = (from.clone(), to.clone());
        let handled = options.has_conflict_policy();
        run_blocking(from.clone(), move || precheck(&from, &to, handled)).await?;
    }
    if options.clean_destination {
        reject_nested_source(&from, &to)?;
        crate::write::ensure_dir_async(
            to.clone(),
            crate::write::DirOptions {
                empty: true,
                mode: None,
            },
        )
        .await?;
    }
    let matcher = compile_matcher(&from, &options)?;

    debug!(from = %from.display(), to = %to.display(), "starting async copy");

    let mut engine = Engine {
        preserve_times: options.preserve_times,
        report: options.report,
        byte_threshold: options.byte_threshold,
        progress_interval: options.progress_interval,
        fallback: if options.overwrite || options.clean_destination {
            Some(Resolution::one(ConflictAction::Overwrite))
        } else {
            None
        },
        resolver: options.resolver.clone(),
        cache: options.resolution,
        on_bytes: options.on_bytes.take(),
        cancel: CancellationToken::new(),
        records: Vec::new(),
    };

    let mut report = CopyReport::default();
    let mut dir_times: Vec<(PathBuf, Timestamps)> = Vec::new();
    let mut done = 0usize;

    let mut stream = walk_stream(from.clone(), engine_walk_options());
    while let Some(item) = stream.next().await {
        if engine.cancel.is_cancelled() {
            report.aborted = true;
            break;
        }
        let item = item?;
        let Some(entry) = item.entry else {
            return Err(FsError::not_found(item.path));
        };
        if !matches(matcher.as_ref(), &item.path)? {
            continue;
        }
        let dest = map_destination(&from, &to, &item.path)?;

        let outcome = engine.settle(&item.path, &dest, &entry).await?;
        if outcome == ItemOutcome::Aborted {
            report.aborted = true;
            break;
        }
        settle_outcome(
            outcome,
            &dest,
            &entry,
            engine.preserve_times,
            &mut report,
            &mut dir_times,
        )?;

        done += 1;
        if let Some(on_item) = options.on_item.as_mut() {
            let keep_going = on_item(&ItemProgress {
                path: dest,
                done,
                total: None,
                entry,
            });
            if !keep_going {
                debug!("progress callback requested abort");
                engine.cancel.cancel();
            }
        }
    }
    if engine.cancel.is_cancelled() {
        report.aborted = true;
    }
    report.records = engine.records;

    if !dir_times.is_empty() {
        run_blocking(to.clone(), move || restore_dir_times(&mut dir_times)).await?;
    }
    Ok(report)
}

/// Book-keeping shared by both engines after an item settles.
fn settle_outcome(
    outcome: ItemOutcome,
    dest: &Path,
    entry: &Descriptor,
    preserve_times: bool,
    report: &mut CopyReport,
    dir_times: &mut Vec<(PathBuf, Timestamps)>,
) -> Result<(), FsError> {
    match outcome {
        ItemOutcome::Copied(bytes) => {
            report.copied += 1;
            report.bytes_copied += bytes;
            if preserve_times {
                match (entry.kind, entry.times) {
                    // Directory times are restored after the walk;
                    // writing children would bump them again.
                    (EntryKind::Dir, Some(times)) => dir_times.push((dest.to_path_buf(), times)),
                    (EntryKind::File, Some(times)) => apply_times(dest, &times)?,
                    _ => {}
                }
            }
        }
        ItemOutcome::Skipped => report.skipped += 1,
        ItemOutcome::Aborted => {}
    }
    Ok(())
}

/// Deepest directories first, so touching a child cannot disturb an
/// already-restored parent.
fn restore_dir_times(dir_times: &mut Vec<(PathBuf, Timestamps)>) -> Result<(), FsError> {
    while let Some((path, times)) = dir_times.pop() {
        apply_times(&path, &times)?;
    }
    Ok(())
}

fn apply_times(dest: &Path, times: &Timestamps) -> Result<(), FsError> {
    let mtime = FileTime::from_system_time(times.modified);
    let atime = FileTime::from_system_time(times.accessed.unwrap_or(times.modified));
    filetime::set_file_times(dest, atime, mtime).map_err(|e| FsError::io(dest, e))
}

/// Async conflict machinery. Lives only as long as one `copy_async`
/// call; the resolution cache never outlives it.
struct Engine {
    preserve_times: bool,
    report: bool,
    byte_threshold: u64,
    progress_interval: Duration,
    /// What the exists-layer falls back to without a resolver.
    fallback: Option<Resolution>,
    resolver: Option<SharedResolver>,
    cache: Option<Resolution>,
    on_bytes: Option<ByteHandler>,
    cancel: CancellationToken,
    records: Vec<ConflictRecord>,
}

/// Error classes the write layer offers to the resolver; everything
/// else propagates.
fn intercepts(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::PermissionDenied
            | ErrorKind::NotFound
            | ErrorKind::AlreadyExists
            | ErrorKind::NotADirectory
            | ErrorKind::NotAFile
    )
}

impl Engine {
    /// Consult the cache, then the resolver, then the fallback.
    async fn decide(
        &mut self,
        path: &Path,
        entry: Option<&Descriptor>,
        error: ErrorKind,
        fallback: Option<Resolution>,
    ) -> Option<Resolution> {
        if let Some(cached) = self.cache {
            return Some(cached);
        }
        let Some(resolver) = self.resolver.clone() else {
            return fallback;
        };
        let resolution = resolver.resolve(path, entry, error).await;
        trace!(path = %path.display(), %error, action = %resolution.action, "conflict resolved");
        if resolution.applies_to_all() {
            self.cache = Some(resolution);
        }
        Some(resolution)
    }

    fn record(
        &mut self,
        path: &Path,
        entry: Option<Descriptor>,
        error: ErrorKind,
        resolution: Resolution,
    ) {
        if self.report {
            self.records.push(ConflictRecord {
                path: path.to_path_buf(),
                entry,
                error,
                resolution,
            });
        }
    }

    /// Fresh descriptor of whatever occupies `path`, with times for
    /// comparisons. Best effort: probing failures read as vacant, so a
    /// wrong-kind ancestor surfaces as a write failure for the second
    /// layer instead of ending the copy.
    async fn probe(&self, path: &Path) -> Option<Descriptor> {
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

    /// Resolve one item through both conflict layers and perform it.
    async fn settle(
        &mut self,
        src: &Path,
        dest: &Path,
        entry: &Descriptor,
    ) -> Result<ItemOutcome, FsError> {
        // Layer one: the destination is already occupied.
        let mut planned = ConflictAction::Overwrite;
        loop {
            let Some(existing) = self.probe(dest).await else {
                break;
            };
            let resolution = self
                .decide(dest, Some(&existing), ErrorKind::AlreadyExists, self.fallback)
                .await
                .unwrap_or(Resolution::one(ConflictAction::Throw));
            match resolution.action {
                ConflictAction::Retry => continue,
                ConflictAction::Throw => return Err(FsError::already_exists(dest)),
                ConflictAction::Skip => {
                    self.record(dest, Some(existing), ErrorKind::AlreadyExists, resolution);
                    return Ok(ItemOutcome::Skipped);
                }
                ConflictAction::Abort => {
                    self.record(dest, Some(existing), ErrorKind::AlreadyExists, resolution);
                    self.cancel.cancel();
                    return Ok(ItemOutcome::Aborted);
                }
                ConflictAction::IfNewer => {
                    let proceed = entry.kind == EntryKind::Dir || source_newer(entry, &existing);
                    self.record(dest, Some(existing), ErrorKind::AlreadyExists, resolution);
                    if !proceed {
                        return Ok(ItemOutcome::Skipped);
                    }
                    planned = ConflictAction::Overwrite;
                    break;
                }
                ConflictAction::IfSizeDiffers => {
                    let same_size = entry.kind == EntryKind::File
                        && existing.kind == EntryKind::File
                        && entry.size == existing.size;
                    self.record(dest, Some(existing), ErrorKind::AlreadyExists, resolution);
                    if same_size {
                        return Ok(ItemOutcome::Skipped);
                    }
                    planned = ConflictAction::Overwrite;
                    break;
                }
                ConflictAction::Overwrite | ConflictAction::Append => {
                    self.record(dest, Some(existing), ErrorKind::AlreadyExists, resolution);
                    planned = resolution.action;
                    break;
                }
            }
        }

        // Layer two: failures while performing the write.
        loop {
            if self.cancel.is_cancelled() {
                return Ok(ItemOutcome::Aborted);
            }
            let attempt = self.perform_async(src, dest, entry, planned).await;
            let err = match attempt {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };
            let kind = err.kind();
            if !intercepts(kind) {
                return Err(err);
            }
            let existing = self.probe(dest).await;
            let Some(resolution) = self.decide(dest, existing.as_ref(), kind, None).await else {
                return Err(err);
            };
            match resolution.action {
                ConflictAction::Retry => {}
                ConflictAction::Overwrite => {
                    self.record(dest, existing, kind, resolution);
                    planned = ConflictAction::Overwrite;
                }
                ConflictAction::Skip => {
                    self.record(dest, existing, kind, resolution);
                    return Ok(ItemOutcome::Skipped);
                }
                ConflictAction::Abort => {
                    self.record(dest, existing, kind, resolution);
                    self.cancel.cancel();
                    return Ok(ItemOutcome::Aborted);
                }
                ConflictAction::Throw => return Err(err),
                // Comparison and append answers do not apply to a
                // failed write.
                ConflictAction::IfNewer
                | ConflictAction::IfSizeDiffers
                | ConflictAction::Append => {
                    return Err(FsError::invalid_input(format!(
                        "resolution {} cannot settle a {} failure at {}",
                        resolution.action,
                        kind,
                        dest.display()
                    )));
                }
            }
        }
    }

    async fn perform_async(
        &mut self,
        src: &Path,
        dest: &Path,
        entry: &Descriptor,
        planned: ConflictAction,
    ) -> Result<ItemOutcome, FsError> {
        match entry.kind {
            EntryKind::File => {
                let append = planned == ConflictAction::Append;
                let mut on_bytes = self.on_bytes.take();
                let threshold = self.byte_threshold;
                let interval = self.progress_interval;
                let (src, dest, entry) = (src.to_path_buf(), dest.to_path_buf(), entry.clone());
                let context = dest.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let result = copy_file_item(&src, &dest, &entry, &mut on_bytes, threshold, interval, append);
                    (result, on_bytes)
                })
                .await;
                match joined {
                    Ok((result, handler)) => {
                        self.on_bytes = handler;
                        Ok(ItemOutcome::Copied(result?))
                    }
                    Err(e) => Err(FsError::io(context, std::io::Error::other(e))),
                }
            }
            _ => {
                let (src, dest, entry) = (src.to_path_buf(), dest.to_path_buf(), entry.clone());
                run_blocking(dest.clone(), move || {
                    perform(&src, &dest, &entry, planned, &mut None, 0, Duration::ZERO)
                })
                .await
            }
        }
    }
}

/// Whether the source is at least as recently modified as the
/// destination; missing timestamps copy rather than skip.
fn source_newer(entry: &Descriptor, existing: &Descriptor) -> bool {
    match (entry.times, existing.times) {
        (Some(src), Some(dst)) => src.modified >= dst.modified,
        _ => true,
    }
}

/// Copy a single item, blocking. `planned` distinguishes append from
/// plain overwrite for file bodies.
fn perform(
    src: &Path,
    dest: &Path,
    entry: &Descriptor,
    planned: ConflictAction,
    on_bytes: &mut Option<ByteHandler>,
    byte_threshold: u64,
    progress_interval: Duration,
) -> Result<ItemOutcome, FsError> {
    match entry.kind {
        EntryKind::File => {
            let append = planned == ConflictAction::Append;
            copy_file_item(src, dest, entry, on_bytes, byte_threshold, progress_interval, append)
                .map(ItemOutcome::Copied)
        }
        EntryKind::Dir => {
            clear_conflicting(dest, EntryKind::Dir)?;
            make_dir(dest, entry.mode)?;
            Ok(ItemOutcome::Copied(0))
        }
        EntryKind::Symlink => {
            clear_conflicting(dest, EntryKind::Symlink)?;
            relink(src, dest)?;
            Ok(ItemOutcome::Copied(0))
        }
        // Sockets, fifos and devices are not copyable content.
        EntryKind::Other => Ok(ItemOutcome::Skipped),
    }
}

fn copy_file_item(
    src: &Path,
    dest: &Path,
    entry: &Descriptor,
    on_bytes: &mut Option<ByteHandler>,
    byte_threshold: u64,
    progress_interval: Duration,
    append: bool,
) -> Result<u64, FsError> {
    if !append {
        clear_conflicting(dest, EntryKind::File)?;
    }
    copy_file_body(src, dest, entry, on_bytes, byte_threshold, progress_interval, append)
}

/// Remove a destination occupant the upcoming write cannot replace in
/// place. Same-kind files and directories are left for truncation or
/// merging.
fn clear_conflicting(dest: &Path, source_kind: EntryKind) -> Result<(), FsError> {
    let Some(existing) = occupied_kind(dest)? else {
        return Ok(());
    };
    let replace = match source_kind {
        EntryKind::File => existing != EntryKind::File,
        EntryKind::Dir => existing != EntryKind::Dir,
        _ => true,
    };
    if !replace {
        return Ok(());
    }
    trace!(path = %dest.display(), existing = %existing, "clearing conflicting destination");
    let result = if existing == EntryKind::Dir {
        fs::remove_dir_all(dest)
    } else {
        fs::remove_file(dest)
    };
    result.map_err(|e| FsError::io(dest, e))
}

fn make_dir(dest: &Path, mode: Option<u32>) -> Result<(), FsError> {
    match try_make_dir(dest, mode) {
        Ok(()) => Ok(()),
        // Merging into an existing directory is fine.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let metadata = fs::symlink_metadata(dest).map_err(|e| FsError::io(dest, e))?;
            if metadata.is_dir() {
                Ok(())
            } else {
                Err(FsError::already_exists(dest))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_parents(dest)?;
            try_make_dir(dest, mode).map_err(|e| FsError::io(dest, e))
        }
        Err(e) => Err(FsError::io(dest, e)),
    }
}

#[cfg(unix)]
fn try_make_dir(dest: &Path, mode: Option<u32>) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    let mut builder = fs::DirBuilder::new();
    if let Some(mode) = mode {
        builder.mode(duffel_core::normalize_mode(mode));
    }
    builder.create(dest)
}

#[cfg(not(unix))]
fn try_make_dir(dest: &Path, _mode: Option<u32>) -> std::io::Result<()> {
    fs::DirBuilder::new().create(dest)
}

/// Recreate a symlink at the destination. An occupant that appeared
/// since the conflict check is unlinked and the link retried once.
fn relink(src: &Path, dest: &Path) -> Result<(), FsError> {
    let target = fs::read_link(src).map_err(|e| FsError::io(src, e))?;
    match platform_symlink(&target, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            fs::remove_file(dest).map_err(|e| FsError::io(dest, e))?;
            platform_symlink(&target, dest).map_err(|e| FsError::io(dest, e))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_parents(dest)?;
            platform_symlink(&target, dest).map_err(|e| FsError::io(dest, e))
        }
        Err(e) => Err(FsError::io(dest, e)),
    }
}

fn open_dest(dest: &Path, mode: Option<u32>, append: bool) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true);
    if append {
        options.append(true);
    } else {
        options.truncate(true);
    }
    set_create_mode(&mut options, mode);
    options.open(dest)
}

fn copy_file_body(
    src: &Path,
    dest: &Path,
    entry: &Descriptor,
    on_bytes: &mut Option<ByteHandler>,
    byte_threshold: u64,
    progress_interval: Duration,
    append: bool,
) -> Result<u64, FsError> {
    let mut reader = fs::File::open(src).map_err(|e| FsError::io(src, e))?;
    let mut writer = match open_dest(dest, entry.mode, append) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            create_parents(dest)?;
            open_dest(dest, entry.mode, append).map_err(|e| FsError::io(dest, e))?
        }
        Err(e) => return Err(FsError::io(dest, e)),
    };

    let report_bytes = on_bytes.is_some() && entry.size > byte_threshold;
    let mut ticker = ByteTicker::new(progress_interval);
    let mut transferred = 0u64;
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = reader.read(&mut buf).map_err(|e| FsError::io(src, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| FsError::io(dest, e))?;
        transferred += n as u64;
        if report_bytes && ticker.ready() {
            if let Some(on_bytes) = on_bytes.as_mut() {
                on_bytes(&ByteProgress {
                    path: dest.to_path_buf(),
                    transferred,
                    total: entry.size,
                });
            }
        }
    }
    writer.flush().map_err(|e| FsError::io(dest, e))?;
    if report_bytes {
        if let Some(on_bytes) = on_bytes.as_mut() {
            on_bytes(&ByteProgress {
                path: dest.to_path_buf(),
                transferred,
                total: entry.size,
            });
        }
    }
    // Overwrites keep the open-time mode of the old file; align with
    // the source explicitly.
    if let Some(mode) = entry.mode {
        if !append {
            set_mode(dest, mode)?;
        }
    }
    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::conflict::ResolutionScope;

    /// from/
    ///   one.txt  "first"
    ///   two.txt  "second"
    ///   sub/
    ///     three.txt  "third"
    fn fixture() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::create_dir_all(from.join("sub")).unwrap();
        fs::write(from.join("one.txt"), b"first").unwrap();
        fs::write(from.join("two.txt"), b"second").unwrap();
        fs::write(from.join("sub/three.txt"), b"third").unwrap();
        (tmp, from, to)
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_copy_tree_round_trip() {
        let (_tmp, from, to) = fixture();
        let report = copy(&from, &to, CopyOptions::new()).unwrap();

        assert_eq!(report.copied, 5); // root, two files, sub, nested file
        assert_eq!(report.bytes_copied, 16);
        assert!(!report.aborted);
        assert_eq!(read(&to.join("one.txt")), "first");
        assert_eq!(read(&to.join("two.txt")), "second");
        assert_eq!(read(&to.join("sub/three.txt")), "third");
    }

    #[test]
    fn test_copy_single_file_creates_parents() {
        let (_tmp, from, to) = fixture();
        let dest = to.join("deep/nested/renamed.txt");
        let report = copy(from.join("one.txt"), &dest, CopyOptions::new()).unwrap();
        assert_eq!(report.copied, 1);
        assert_eq!(read(&dest), "first");
    }

    #[test]
    fn test_copy_missing_source_is_not_found() {
        let (_tmp, from, to) = fixture();
        let err = copy(from.join("ghost"), &to, CopyOptions::new()).unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
    }

    #[test]
    fn test_copy_occupied_destination_without_policy_fails_fast() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        let err = copy(&from, &to, CopyOptions::new()).unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));
    }

    #[test]
    fn test_copy_into_itself_is_rejected() {
        let (_tmp, from, _to) = fixture();
        let err = copy(&from, from.join("sub/copy"), CopyOptions::new()).unwrap_err();
        assert!(matches!(err, FsError::InvalidInput { .. }));
    }

    #[test]
    fn test_sync_overwrite_merges_trees() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("one.txt"), b"stale").unwrap();
        fs::write(to.join("keep.log"), b"untouched").unwrap();

        let report = copy(&from, &to, CopyOptions::new().with_overwrite(true)).unwrap();
        assert_eq!(report.copied, 5);
        assert_eq!(read(&to.join("one.txt")), "first");
        assert_eq!(read(&to.join("keep.log")), "untouched");
    }

    #[test]
    fn test_matching_filters_items() {
        let (_tmp, from, to) = fixture();
        let report = copy(
            &from,
            &to,
            CopyOptions::new().with_matching(vec!["*.txt".into(), "!two.txt".into()]),
        )
        .unwrap();

        assert_eq!(report.copied, 2); // one.txt and sub/three.txt
        assert!(to.join("one.txt").is_file());
        assert!(!to.join("two.txt").exists());
        assert_eq!(read(&to.join("sub/three.txt")), "third");
    }

    #[test]
    fn test_clean_destination_empties_first() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("stale.bin"), b"old").unwrap();

        copy(&from, &to, CopyOptions::new().with_clean_destination(true)).unwrap();
        assert!(!to.join("stale.bin").exists());
        assert!(to.join("one.txt").is_file());
    }

    #[test]
    fn test_clean_rejects_source_inside_destination() {
        let (_tmp, from, _to) = fixture();
        let err = copy(
            from.join("sub"),
            &from,
            CopyOptions::new().with_clean_destination(true),
        )
        .unwrap_err();
        assert!(matches!(err, FsError::InvalidInput { .. }));
        // Nothing was emptied before the refusal.
        assert!(from.join("one.txt").exists());
        assert!(from.join("sub/three.txt").exists());
    }

    #[test]
    fn test_sync_progress_has_totals() {
        let (_tmp, from, to) = fixture();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let report = copy(
            &from,
            &to,
            CopyOptions::new().with_progress(move |p| {
                sink.lock().unwrap().push((p.done, p.total));
                true
            }),
        )
        .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(report.copied, 5);
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|(_, total)| *total == Some(5)));
        assert_eq!(seen.last().unwrap().0, 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_mode_and_symlinks() {
        use std::os::unix::fs::PermissionsExt;
        let (_tmp, from, to) = fixture();
        fs::set_permissions(from.join("one.txt"), fs::Permissions::from_mode(0o711)).unwrap();
        std::os::unix::fs::symlink("one.txt", from.join("alias")).unwrap();

        copy(&from, &to, CopyOptions::new()).unwrap();
        let mode = fs::metadata(to.join("one.txt")).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o711);
        assert_eq!(
            fs::read_link(to.join("alias")).unwrap(),
            PathBuf::from("one.txt")
        );
    }

    #[test]
    fn test_preserve_times() {
        let (_tmp, from, to) = fixture();
        let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_times(from.join("one.txt"), old, old).unwrap();
        filetime::set_file_times(from.join("sub"), old, old).unwrap();

        copy(&from, &to, CopyOptions::new().with_preserve_times(true)).unwrap();

        let file_mtime = FileTime::from_last_modification_time(
            &fs::metadata(to.join("one.txt")).unwrap(),
        );
        assert_eq!(file_mtime.unix_seconds(), 1_000_000_000);
        let dir_mtime =
            FileTime::from_last_modification_time(&fs::metadata(to.join("sub")).unwrap());
        assert_eq!(dir_mtime.unix_seconds(), 1_000_000_000);
    }

    #[test]
    fn test_byte_progress_reports_completion() {
        let (_tmp, from, to) = fixture();
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = calls.clone();
        copy(
            &from,
            &to,
            CopyOptions::new()
                .with_byte_threshold(0)
                .with_progress_interval(Duration::ZERO)
                .with_byte_progress(move |p| {
                    sink.lock().unwrap().push((p.transferred, p.total));
                }),
        )
        .unwrap();

        let calls = calls.lock().unwrap();
        assert!(!calls.is_empty());
        // Every body ends with a final transferred == total report.
        assert!(calls.iter().any(|(t, total)| t == total && *total == 5));
    }

    #[tokio::test]
    async fn test_async_copy_matches_sync() {
        let (_tmp, from, to) = fixture();
        let report = copy_async(&from, &to, CopyOptions::new()).await.unwrap();
        assert_eq!(report.copied, 5);
        assert_eq!(read(&to.join("sub/three.txt")), "third");
    }

    #[tokio::test]
    async fn test_async_skip_on_conflict_keeps_destination() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("one.txt"), b"precious").unwrap();

        let report = copy_async(
            &from,
            &to,
            CopyOptions::new()
                .with_reporting(true)
                .with_resolver(|_: &Path, _: Option<&Descriptor>, _: ErrorKind| {
                    Resolution::one(ConflictAction::Skip)
                }),
        )
        .await
        .unwrap();

        assert_eq!(read(&to.join("one.txt")), "precious");
        assert_eq!(read(&to.join("two.txt")), "second");
        // Root dir merge counts as a conflict too: `to` itself exists.
        assert!(report.skipped >= 1);
        assert!(
            report
                .records
                .iter()
                .any(|r| r.path == to.join("one.txt")
                    && r.error == ErrorKind::AlreadyExists
                    && r.resolution.action == ConflictAction::Skip)
        );
    }

    #[tokio::test]
    async fn test_all_items_scope_consults_resolver_once() {
        let (_tmp, from, to) = fixture();
        fs::create_dir_all(to.join("sub")).unwrap();
        fs::write(to.join("one.txt"), b"old1").unwrap();
        fs::write(to.join("two.txt"), b"old2").unwrap();
        fs::write(to.join("sub/three.txt"), b"old3").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let report = copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolver(move |_: &Path, _: Option<&Descriptor>, _: ErrorKind| {
                counter.fetch_add(1, Ordering::SeqCst);
                Resolution::all(ConflictAction::Overwrite)
            }),
        )
        .await
        .unwrap();

        // The first conflict is the destination root itself; its
        // all-items answer covers every later conflict.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.copied, 5);
        assert_eq!(read(&to.join("one.txt")), "first");
        assert_eq!(read(&to.join("sub/three.txt")), "third");
    }

    #[tokio::test]
    async fn test_abort_after_two_of_five_leaves_exactly_two() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::create_dir(&from).unwrap();
        for i in 1..=5 {
            fs::write(from.join(format!("f{i}.txt")), format!("body {i}")).unwrap();
        }

        let mut files_done = 0usize;
        let report = copy_async(
            &from,
            &to,
            CopyOptions::new().with_progress(move |p| {
                if p.entry.kind == EntryKind::File {
                    files_done += 1;
                }
                files_done < 2
            }),
        )
        .await
        .unwrap();

        assert!(report.aborted);
        let copied_files = fs::read_dir(&to)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_type().unwrap().is_file())
            .count();
        assert_eq!(copied_files, 2);
    }

    #[tokio::test]
    async fn test_resolver_abort_stops_early() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("one.txt"), b"wall").unwrap();

        let report = copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolver(|path: &Path, _: Option<&Descriptor>, _: ErrorKind| {
                if path.ends_with("one.txt") {
                    Resolution::one(ConflictAction::Abort)
                } else {
                    Resolution::one(ConflictAction::Overwrite)
                }
            }),
        )
        .await
        .unwrap();

        assert!(report.aborted);
        assert_eq!(read(&to.join("one.txt")), "wall");
        // one.txt sorts first among the root's children, so nothing
        // after it was attempted.
        assert!(!to.join("two.txt").exists());
    }

    #[tokio::test]
    async fn test_if_size_differs() {
        let (_tmp, from, to) = fixture();
        fs::create_dir_all(to.join("sub")).unwrap();
        fs::write(to.join("one.txt"), b"12345").unwrap(); // same size as "first"
        fs::write(to.join("two.txt"), b"different length").unwrap();
        fs::write(to.join("sub/three.txt"), b"third").unwrap(); // same size

        let report = copy_async(
            &from,
            &to,
            CopyOptions::new()
                .with_resolution(Resolution::all(ConflictAction::IfSizeDiffers)),
        )
        .await
        .unwrap();

        assert_eq!(read(&to.join("one.txt")), "12345"); // skipped
        assert_eq!(read(&to.join("two.txt")), "second"); // overwritten
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn test_if_newer_skips_older_source() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("one.txt"), b"newer than source").unwrap();

        // Source far in the past, destination just written.
        let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_times(from.join("one.txt"), old, old).unwrap();

        copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolution(Resolution::all(ConflictAction::IfNewer)),
        )
        .await
        .unwrap();

        assert_eq!(read(&to.join("one.txt")), "newer than source");
        assert_eq!(read(&to.join("two.txt")), "second"); // fresh copy, no conflict
    }

    #[tokio::test]
    async fn test_append_resolution_extends_destination() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("one.txt"), b"log:").unwrap();

        copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolution(Resolution::all(ConflictAction::Append)),
        )
        .await
        .unwrap();

        assert_eq!(read(&to.join("one.txt")), "log:first");
    }

    #[tokio::test]
    async fn test_static_throw_surfaces_already_exists() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();

        let err = copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolution(Resolution::all(ConflictAction::Throw)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_scope_this_item_consults_again() {
        let (_tmp, from, to) = fixture();
        fs::create_dir_all(to.join("sub")).unwrap();
        fs::write(to.join("one.txt"), b"x").unwrap();
        fs::write(to.join("two.txt"), b"y").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolver(move |_: &Path, _: Option<&Descriptor>, _: ErrorKind| {
                counter.fetch_add(1, Ordering::SeqCst);
                Resolution {
                    action: ConflictAction::Overwrite,
                    scope: ResolutionScope::ThisItem,
                }
            }),
        )
        .await
        .unwrap();

        // Conflicts: to itself, to/sub, one.txt, two.txt.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_write_failure_consults_resolver_again() {
        let (_tmp, from, to) = fixture();
        // A directory squats where the file one.txt must land, so the
        // appended write fails and comes back to the resolver.
        fs::create_dir_all(to.join("one.txt")).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let report = copy_async(
            &from,
            &to,
            CopyOptions::new().with_reporting(true).with_resolver(
                move |_: &Path, _: Option<&Descriptor>, error: ErrorKind| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    match error {
                        ErrorKind::AlreadyExists => Resolution::one(ConflictAction::Append),
                        _ => Resolution::one(ConflictAction::Overwrite),
                    }
                },
            ),
        )
        .await
        .unwrap();

        // to itself, to/one.txt occupied, to/one.txt failed append.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.copied, 5);
        assert_eq!(read(&to.join("one.txt")), "first");
        assert!(
            report
                .records
                .iter()
                .any(|r| r.path == to.join("one.txt")
                    && r.error == ErrorKind::NotAFile
                    && r.resolution.action == ConflictAction::Overwrite)
        );
    }

    #[tokio::test]
    async fn test_comparison_answer_cannot_settle_write_failure() {
        let (_tmp, from, to) = fixture();
        fs::create_dir_all(to.join("one.txt")).unwrap();

        let err = copy_async(
            &from,
            &to,
            CopyOptions::new().with_resolver(
                |_: &Path, _: Option<&Descriptor>, error: ErrorKind| match error {
                    ErrorKind::AlreadyExists => Resolution::one(ConflictAction::Append),
                    _ => Resolution::one(ConflictAction::IfNewer),
                },
            ),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FsError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_skip_all_covers_wrong_kind_collisions() {
        let (_tmp, from, to) = fixture();
        fs::create_dir(&to).unwrap();
        fs::write(to.join("sub"), b"flat file").unwrap();

        let report = copy_async(
            &from,
            &to,
            CopyOptions::new()
                .with_reporting(true)
                .with_resolution(Resolution::all(ConflictAction::Skip)),
        )
        .await
        .unwrap();

        // The squatter stays; its unreachable child settles through the
        // write layer instead of failing the whole copy.
        assert_eq!(read(&to.join("sub")), "flat file");
        assert_eq!(read(&to.join("one.txt")), "first");
        assert_eq!(report.copied, 2);
        assert_eq!(report.skipped, 3);
        assert!(
            report
                .records
                .iter()
                .any(|r| r.path == to.join("sub/three.txt")
                    && r.error == ErrorKind::NotADirectory
                    && r.resolution.action == ConflictAction::Skip)
        );
    }
}
