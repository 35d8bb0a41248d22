//! duffel - a filesystem convenience toolkit.
//!
//! Usage:
//!   duffel inspect PATH          Describe one entry
//!   duffel list PATH             List a directory
//!   duffel tree PATH             Describe a whole subtree
//!   duffel find PATH [PATTERN]   Search with glob patterns
//!   duffel read PATH             Print file content
//!   duffel write PATH CONTENT    Write a file
//!   duffel copy FROM TO          Copy a tree
//!   duffel move FROM TO          Move an entry
//!   duffel remove PATH           Remove an entry or tree
//!   duffel --help                Show help

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};

use duffel::{
    ChecksumAlgo, ConflictAction, CopyOptions, DirOptions, FileOptions, FindOptions,
    InspectOptions, MoveOptions, RemoveOptions, Resolution, SymlinkMode, TreeEntry, TreeOptions,
    WriteOptions, Workdir, format_mode, parse_mode,
};

#[derive(Parser)]
#[command(
    name = "duffel",
    version,
    about = "A filesystem convenience toolkit",
    long_about = "duffel bundles everyday filesystem chores: inspect entries and \
                  whole subtrees, search with glob patterns, and copy, move or \
                  remove trees with conflict-aware engines."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Describe one entry
    Inspect {
        /// Path to describe
        path: PathBuf,

        /// Compute a content checksum
        #[arg(short, long)]
        checksum: Option<ChecksumArg>,

        /// Describe what a symlink points at instead of the link
        #[arg(short = 'L', long)]
        follow: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List a directory
    List {
        /// Directory to list
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Describe a whole subtree with aggregated sizes
    Tree {
        /// Root of the subtree
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Per-file checksum, directories get a rollup digest
        #[arg(short, long)]
        checksum: Option<ChecksumArg>,

        /// Maximum depth to display
        #[arg(short, long)]
        depth: Option<u32>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Find entries matching glob patterns
    Find {
        /// Directory to search below
        path: PathBuf,

        /// Glob patterns; later patterns win, `!` negates
        #[arg(default_value = "*")]
        patterns: Vec<String>,

        /// Include directories in the results
        #[arg(short, long)]
        dirs: bool,

        /// Exclude regular files from the results
        #[arg(long)]
        no_files: bool,

        /// Search the immediate children only
        #[arg(long)]
        flat: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print file content
    Read {
        /// File to read
        path: PathBuf,
    },

    /// Write a file, creating missing ancestors
    Write {
        /// File to write
        path: PathBuf,

        /// Content to write
        content: String,

        /// Stage the content in a sibling and rename it into place
        #[arg(short, long)]
        atomic: bool,

        /// Octal permission bits, e.g. 644
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Append to a file, creating it as needed
    Append {
        /// File to append to
        path: PathBuf,

        /// Content to append
        content: String,
    },

    /// Ensure a directory exists
    Dir {
        /// Directory to ensure
        path: PathBuf,

        /// Remove any existing children
        #[arg(short, long)]
        empty: bool,

        /// Octal permission bits, e.g. 755
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Ensure a file exists
    File {
        /// File to ensure
        path: PathBuf,

        /// Content the file must have
        #[arg(short, long)]
        content: Option<String>,

        /// Octal permission bits, e.g. 644
        #[arg(short, long)]
        mode: Option<String>,
    },

    /// Copy a tree
    Copy {
        /// Source entry
        from: PathBuf,

        /// Destination path
        to: PathBuf,

        /// Replace existing destination entries
        #[arg(short, long)]
        overwrite: bool,

        /// Copy only entries matching these patterns
        #[arg(short, long)]
        matching: Vec<String>,

        /// Apply source times to copied entries
        #[arg(short = 't', long)]
        preserve_times: bool,

        /// Empty the destination directory first
        #[arg(long)]
        clean: bool,

        /// Resolve every destination conflict the same way
        #[arg(long, value_name = "ACTION")]
        on_conflict: Option<CopyConflictArg>,

        /// Report per-item progress on stderr
        #[arg(short, long)]
        progress: bool,
    },

    /// Move an entry, copying across devices when needed
    Move {
        /// Source entry
        from: PathBuf,

        /// Destination path
        to: PathBuf,

        /// Replace an existing destination entry
        #[arg(short, long)]
        overwrite: bool,
    },

    /// Give an entry a new name in place
    Rename {
        /// Entry to rename
        path: PathBuf,

        /// New name, a single path component
        new_name: String,
    },

    /// Remove an entry or tree
    Remove {
        /// Entry to remove
        path: PathBuf,

        /// Move it to the platform trash instead of deleting
        #[arg(short, long)]
        trash: bool,

        /// Resolve permission and non-empty failures the same way
        #[arg(long, value_name = "ACTION")]
        on_conflict: Option<RemoveConflictArg>,

        /// Print every handled conflict at the end
        #[arg(short, long)]
        report: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChecksumArg {
    Blake3,
    Sha256,
}

impl From<ChecksumArg> for ChecksumAlgo {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Blake3 => ChecksumAlgo::Blake3,
            ChecksumArg::Sha256 => ChecksumAlgo::Sha256,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CopyConflictArg {
    Skip,
    Overwrite,
    IfNewer,
    IfSizeDiffers,
    Throw,
}

impl From<CopyConflictArg> for ConflictAction {
    fn from(arg: CopyConflictArg) -> Self {
        match arg {
            CopyConflictArg::Skip => ConflictAction::Skip,
            CopyConflictArg::Overwrite => ConflictAction::Overwrite,
            CopyConflictArg::IfNewer => ConflictAction::IfNewer,
            CopyConflictArg::IfSizeDiffers => ConflictAction::IfSizeDiffers,
            CopyConflictArg::Throw => ConflictAction::Throw,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RemoveConflictArg {
    Skip,
    Throw,
}

impl From<RemoveConflictArg> for ConflictAction {
    fn from(arg: RemoveConflictArg) -> Self {
        match arg {
            RemoveConflictArg::Skip => ConflictAction::Skip,
            RemoveConflictArg::Throw => ConflictAction::Throw,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ctx = Workdir::new(".").context("Cannot resolve working directory")?;

    match cli.command {
        Command::Inspect {
            path,
            checksum,
            follow,
            format,
        } => run_inspect(&ctx, &path, checksum, follow, format),
        Command::List { path, format } => run_list(&ctx, &path, format),
        Command::Tree {
            path,
            checksum,
            depth,
            format,
        } => run_tree(&ctx, &path, checksum, depth, format),
        Command::Find {
            path,
            patterns,
            dirs,
            no_files,
            flat,
            format,
        } => run_find(&ctx, &path, patterns, dirs, no_files, flat, format),
        Command::Read { path } => run_read(&ctx, &path),
        Command::Write {
            path,
            content,
            atomic,
            mode,
        } => {
            let options = WriteOptions {
                atomic,
                mode: parse_mode_arg(mode.as_deref())?,
            };
            ctx.write(&path, content, &options)?;
            Ok(())
        }
        Command::Append { path, content } => {
            ctx.append(&path, content, None)?;
            Ok(())
        }
        Command::Dir { path, empty, mode } => {
            let options = DirOptions {
                empty,
                mode: parse_mode_arg(mode.as_deref())?,
            };
            ctx.dir(&path, &options)?;
            Ok(())
        }
        Command::File {
            path,
            content,
            mode,
        } => {
            let options = FileOptions {
                content: content.map(String::into_bytes),
                mode: parse_mode_arg(mode.as_deref())?,
            };
            ctx.file(&path, &options)?;
            Ok(())
        }
        Command::Copy {
            from,
            to,
            overwrite,
            matching,
            preserve_times,
            clean,
            on_conflict,
            progress,
        } => run_copy(
            &ctx,
            from,
            to,
            overwrite,
            matching,
            preserve_times,
            clean,
            on_conflict,
            progress,
        ),
        Command::Move {
            from,
            to,
            overwrite,
        } => {
            ctx.move_path(&from, &to, &MoveOptions { overwrite })?;
            Ok(())
        }
        Command::Rename { path, new_name } => {
            ctx.rename(&path, &new_name)?;
            Ok(())
        }
        Command::Remove {
            path,
            trash,
            on_conflict,
            report,
        } => run_remove(&ctx, &path, trash, on_conflict, report),
    }
}

/// Describe one entry.
fn run_inspect(
    ctx: &Workdir,
    path: &PathBuf,
    checksum: Option<ChecksumArg>,
    follow: bool,
    format: OutputFormat,
) -> Result<()> {
    let options = InspectOptions {
        mode: true,
        times: true,
        checksum: checksum.map(ChecksumAlgo::from),
        absolute_path: true,
        symlinks: if follow {
            SymlinkMode::Follow
        } else {
            SymlinkMode::Report
        },
    };
    let Some(descriptor) = ctx.inspect(path, &options)? else {
        return Err(eyre!("Nothing occupies {}", path.display()));
    };

    match format {
        OutputFormat::Text => {
            println!("{:<10} {}", "name", descriptor.name);
            println!("{:<10} {}", "kind", descriptor.kind);
            println!("{:<10} {}", "size", format_size(descriptor.size));
            if let Some(mode) = descriptor.mode {
                println!("{:<10} {}", "mode", format_mode(mode));
            }
            if let Some(modified) = descriptor.modified() {
                println!("{:<10} {}", "modified", format_time(modified));
            }
            if let Some(target) = &descriptor.points_at {
                println!("{:<10} {}", "points at", target.display());
            }
            if let Some(checksum) = &descriptor.checksum {
                println!("{:<10} {}", checksum.algo, checksum.to_hex());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&descriptor)?),
    }
    Ok(())
}

/// List a directory.
fn run_list(ctx: &Workdir, path: &PathBuf, format: OutputFormat) -> Result<()> {
    let Some(names) = ctx.list(path)? else {
        return Err(eyre!("Nothing occupies {}", path.display()));
    };
    match format {
        OutputFormat::Text => {
            for name in names {
                println!("{name}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
    }
    Ok(())
}

/// Describe a whole subtree.
fn run_tree(
    ctx: &Workdir,
    path: &PathBuf,
    checksum: Option<ChecksumArg>,
    depth: Option<u32>,
    format: OutputFormat,
) -> Result<()> {
    let options = TreeOptions {
        checksum: checksum.map(ChecksumAlgo::from),
        relative_path: true,
        ..Default::default()
    };
    let Some(tree) = ctx.tree(path, &options)? else {
        return Err(eyre!("Nothing occupies {}", path.display()));
    };

    match format {
        OutputFormat::Text => {
            print_tree(&tree, 0, depth.unwrap_or(u32::MAX));
            println!();
            println!("{} entries, {}", tree.len(), format_size(tree.descriptor.size));
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
    }
    Ok(())
}

/// Search below a directory.
fn run_find(
    ctx: &Workdir,
    path: &PathBuf,
    patterns: Vec<String>,
    dirs: bool,
    no_files: bool,
    flat: bool,
    format: OutputFormat,
) -> Result<()> {
    let options = FindOptions {
        matching: patterns,
        files: !no_files,
        directories: dirs,
        symlinks: false,
        recursive: !flat,
    };
    let found = ctx.find(path, &options)?;
    match format {
        OutputFormat::Text => {
            for item in &found {
                println!("{}", item.display());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&found)?),
    }
    Ok(())
}

/// Print file content.
fn run_read(ctx: &Workdir, path: &PathBuf) -> Result<()> {
    let Some(content) = ctx.read(path)? else {
        return Err(eyre!("Nothing occupies {}", path.display()));
    };
    print!("{content}");
    Ok(())
}

/// Copy a tree, optionally narrating progress.
///
/// A conflict policy routes through the async engine; plain copies
/// stay on the blocking one, where progress has totals.
#[allow(clippy::too_many_arguments)]
fn run_copy(
    ctx: &Workdir,
    from: PathBuf,
    to: PathBuf,
    overwrite: bool,
    matching: Vec<String>,
    preserve_times: bool,
    clean: bool,
    on_conflict: Option<CopyConflictArg>,
    progress: bool,
) -> Result<()> {
    let mut options = CopyOptions::new()
        .with_overwrite(overwrite)
        .with_preserve_times(preserve_times)
        .with_clean_destination(clean);
    if !matching.is_empty() {
        options = options.with_matching(matching);
    }
    if progress {
        options = options
            .with_progress(|p| {
                match p.total {
                    Some(total) => eprintln!("[{}/{}] {}", p.done, total, p.path.display()),
                    None => eprintln!("[{}] {}", p.done, p.path.display()),
                }
                true
            })
            .with_byte_progress(|p| {
                eprintln!(
                    "  {} / {} {}",
                    format_size(p.transferred),
                    format_size(p.total),
                    p.path.display()
                );
            });
    }

    let report = match on_conflict {
        Some(action) => {
            options = options.with_resolution(Resolution::all(action.into()));
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ctx.copy_async(&from, &to, options))?
        }
        None => ctx.copy(&from, &to, options)?,
    };
    eprintln!("{}", report.summary());
    Ok(())
}

/// Remove an entry or tree.
fn run_remove(
    ctx: &Workdir,
    path: &PathBuf,
    trash: bool,
    on_conflict: Option<RemoveConflictArg>,
    report: bool,
) -> Result<()> {
    let mut options = RemoveOptions::new().with_trash(trash).with_reporting(report);
    let outcome = match on_conflict {
        Some(action) => {
            options = options.with_resolution(Resolution::all(action.into()));
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(ctx.remove_async(path, options))?
        }
        None => ctx.remove(path, &options)?,
    };
    for record in &outcome.records {
        eprintln!(
            "{}: {}, resolved with {}",
            record.path.display(),
            record.error,
            record.resolution.action
        );
    }
    eprintln!("{}", outcome.summary());
    Ok(())
}

/// Print a tree entry and its children.
fn print_tree(entry: &TreeEntry, depth: u32, max_depth: u32) {
    let indent = "  ".repeat(depth as usize);
    let marker = if entry.descriptor.is_dir() { "/" } else { "" };
    let label = format!("{}{}{}", indent, entry.descriptor.name, marker);
    println!("{:<50} {:>10}", label, format_size(entry.descriptor.size));

    if depth < max_depth {
        for child in &entry.children {
            print_tree(child, depth + 1, max_depth);
        }
    } else if !entry.children.is_empty() {
        println!("{}  ... {} more", indent, entry.children.len());
    }
}

/// Parse an octal mode argument.
fn parse_mode_arg(arg: Option<&str>) -> Result<Option<u32>> {
    match arg {
        Some(s) => parse_mode(s)
            .map(Some)
            .ok_or_else(|| eyre!("Invalid mode {s:?}, expected octal digits like 644")),
        None => Ok(None),
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Format a timestamp as seconds since the epoch.
fn format_time(time: std::time::SystemTime) -> String {
    match time.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => format!("{}s since epoch", d.as_secs()),
        Err(_) => String::from("before epoch"),
    }
}
