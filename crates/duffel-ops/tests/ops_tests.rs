use std::fs;
use std::path::Path;

use tempfile::TempDir;

use duffel_core::{Descriptor, EntryKind, ErrorKind};
use duffel_ops::{
    ConflictAction, CopyOptions, DirOptions, FileOptions, MoveOptions, RemoveOptions, Resolution,
    WriteOptions, append, copy, copy_async, ensure_dir, ensure_file, move_path, remove, write,
};

#[test]
fn test_write_copy_move_remove_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    write(
        root.join("project/readme.md"),
        "hello",
        &WriteOptions::default(),
    )
    .unwrap();
    write(
        root.join("project/src/lib.rs"),
        "pub fn f() {}",
        &WriteOptions::default(),
    )
    .unwrap();
    append(root.join("project/readme.md"), " world", None).unwrap();

    let report = copy(root.join("project"), root.join("backup"), CopyOptions::new()).unwrap();
    assert_eq!(report.copied, 4); // project, readme.md, src, lib.rs
    assert_eq!(report.bytes_copied, 24);
    assert_eq!(
        fs::read_to_string(root.join("backup/readme.md")).unwrap(),
        "hello world"
    );

    move_path(
        root.join("backup"),
        root.join("archive"),
        &MoveOptions::default(),
    )
    .unwrap();
    assert!(!root.join("backup").exists());
    assert!(root.join("archive/src/lib.rs").is_file());

    let report = remove(root.join("archive"), &RemoveOptions::new()).unwrap();
    assert_eq!(report.removed, 4);
    assert!(!root.join("archive").exists());

    // Removing what is already gone counts nothing.
    let report = remove(root.join("archive"), &RemoveOptions::new()).unwrap();
    assert_eq!(report.removed, 0);
}

#[cfg(unix)]
#[test]
fn test_copy_round_trip_preserves_structure() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("tree/nested/deep")).unwrap();
    fs::write(root.join("tree/top.txt"), b"top").unwrap();
    fs::write(root.join("tree/nested/mid.txt"), b"middle").unwrap();
    fs::write(root.join("tree/nested/deep/leaf.bin"), [7u8; 1024]).unwrap();
    std::os::unix::fs::symlink("top.txt", root.join("tree/alias")).unwrap();

    copy(root.join("tree"), root.join("mirror"), CopyOptions::new()).unwrap();

    for rel in ["top.txt", "nested/mid.txt", "nested/deep/leaf.bin"] {
        assert_eq!(
            fs::read(root.join("tree").join(rel)).unwrap(),
            fs::read(root.join("mirror").join(rel)).unwrap(),
            "{rel}"
        );
    }
    assert!(root.join("mirror/nested/deep").is_dir());
    let link = fs::read_link(root.join("mirror/alias")).unwrap();
    assert_eq!(link, Path::new("top.txt"));
}

#[test]
fn test_progress_abort_stops_after_two_files() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir(root.join("many")).unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        fs::write(root.join("many").join(format!("{name}.txt")), name).unwrap();
    }

    let mut files = 0usize;
    let options = CopyOptions::new().with_progress(move |progress| {
        assert_eq!(progress.total, Some(6));
        if progress.entry.kind == EntryKind::File {
            files += 1;
        }
        files < 2
    });
    let report = copy(root.join("many"), root.join("part"), options).unwrap();

    assert!(report.aborted);
    assert_eq!(report.copied, 3); // the directory and two files landed
    let landed = fs::read_dir(root.join("part")).unwrap().count();
    assert_eq!(landed, 2);
    assert!(root.join("part/a.txt").exists());
    assert!(root.join("part/b.txt").exists());
}

#[test]
fn test_copy_matching_filters_the_tree() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("notes/sub")).unwrap();
    fs::write(root.join("notes/a.txt"), b"a").unwrap();
    fs::write(root.join("notes/draft.txt"), b"d").unwrap();
    fs::write(root.join("notes/img.png"), b"p").unwrap();
    fs::write(root.join("notes/sub/b.txt"), b"b").unwrap();

    let options = CopyOptions::new().with_matching(vec!["*.txt".into(), "!draft*".into()]);
    let report = copy(root.join("notes"), root.join("out"), options).unwrap();

    // Filtered-out entries are passed over, not counted as skipped.
    assert_eq!(report.copied, 2);
    assert_eq!(report.skipped, 0);
    assert!(root.join("out/a.txt").exists());
    assert!(root.join("out/sub/b.txt").exists());
    assert!(!root.join("out/draft.txt").exists());
    assert!(!root.join("out/img.png").exists());
}

#[tokio::test]
async fn test_async_resolver_decides_per_path() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir(root.join("src")).unwrap();
    fs::write(root.join("src/keep.txt"), b"new keep").unwrap();
    fs::write(root.join("src/skip.txt"), b"new skip").unwrap();
    fs::create_dir(root.join("dst")).unwrap();
    fs::write(root.join("dst/keep.txt"), b"old keep").unwrap();
    fs::write(root.join("dst/skip.txt"), b"old skip").unwrap();

    let options = CopyOptions::new().with_reporting(true).with_resolver(
        |path: &Path, _entry: Option<&Descriptor>, _error: ErrorKind| {
            if path.ends_with("keep.txt") {
                Resolution::one(ConflictAction::Overwrite)
            } else {
                Resolution::one(ConflictAction::Skip)
            }
        },
    );
    let report = copy_async(root.join("src"), root.join("dst"), options)
        .await
        .unwrap();

    assert_eq!(
        fs::read_to_string(root.join("dst/keep.txt")).unwrap(),
        "new keep"
    );
    assert_eq!(
        fs::read_to_string(root.join("dst/skip.txt")).unwrap(),
        "old skip"
    );
    assert_eq!(report.copied, 1);
    // The occupied destination root and skip.txt were both skipped.
    assert_eq!(report.skipped, 2);

    let actions: Vec<_> = report
        .records
        .iter()
        .map(|r| (r.path.clone(), r.resolution.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            (root.join("dst"), ConflictAction::Skip),
            (root.join("dst/keep.txt"), ConflictAction::Overwrite),
            (root.join("dst/skip.txt"), ConflictAction::Skip),
        ]
    );
}

#[test]
fn test_ensure_helpers_compose() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    ensure_dir(root.join("work/cache"), &DirOptions::default()).unwrap();
    ensure_file(
        root.join("work/cache/state.json"),
        &FileOptions {
            content: Some(b"{}".to_vec()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        fs::read_to_string(root.join("work/cache/state.json")).unwrap(),
        "{}"
    );

    ensure_dir(
        root.join("work/cache"),
        &DirOptions {
            empty: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(fs::read_dir(root.join("work/cache")).unwrap().count(), 0);

    write(root.join("work/note.txt"), "v1", &WriteOptions::default()).unwrap();
    write(
        root.join("work/note.txt"),
        "v2",
        &WriteOptions {
            atomic: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        fs::read_to_string(root.join("work/note.txt")).unwrap(),
        "v2"
    );
    // The staging sibling was renamed away, not left behind.
    assert_eq!(fs::read_dir(root.join("work")).unwrap().count(), 2);
}
