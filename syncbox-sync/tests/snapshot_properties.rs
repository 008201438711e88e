use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use syncbox_core::{hash::hash_bytes, IgnoreFilter, Snapshot, SyncOperation};
use syncbox_sync::{build, reconcile, EventTranslator, FsEvent};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn filter() -> IgnoreFilter {
    IgnoreFilter::with_defaults::<&str>(&[]).expect("default rules")
}

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, contents).expect("write");
}

fn populate(root: &Path) {
    write(root, "a.txt", b"alpha");
    write(root, "docs/b.txt", b"bravo");
    write(root, "docs/nested/c.txt", b"alpha");
    write(root, "report.odt#", b"lock");
    write(root, "notes.txt~", b"backup");
    write(root, ".hidden", b"hidden");
    write(root, "docs/.git/config", b"[core]");
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[test]
fn rebuild_over_unchanged_tree_is_identical() {
    init_logging();
    let tmp = TempDir::new().expect("tmp");
    populate(tmp.path());

    let first = build(tmp.path(), &filter()).expect("first build");
    let second = build(tmp.path(), &filter()).expect("second build");
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert_eq!(first.get("a.txt"), Some(hash_bytes(b"alpha").as_str()));
    assert_eq!(first.get("docs/nested/c.txt"), first.get("a.txt"));
}

#[test]
fn ignored_paths_never_enter_the_built_snapshot() {
    init_logging();
    let tmp = TempDir::new().expect("tmp");
    populate(tmp.path());
    let filter = filter();

    let snapshot = build(tmp.path(), &filter).expect("build");
    for (path, _) in &snapshot {
        assert!(!filter.is_ignored(path), "{path} leaked into the snapshot");
    }
    assert!(!snapshot.contains_path("report.odt#"));
    assert!(!snapshot.contains_path("docs/.git/config"));
}

// ---------------------------------------------------------------------------
// Translator against a real tree
// ---------------------------------------------------------------------------

#[test]
fn copied_file_is_detected_by_content() {
    init_logging();
    let tmp = TempDir::new().expect("tmp");
    write(tmp.path(), "a.txt", b"same bytes");
    let mut snapshot = build(tmp.path(), &filter()).expect("build");
    let translator = EventTranslator::new(tmp.path(), filter());

    write(tmp.path(), "b.txt", b"same bytes");
    let ops = translator
        .translate(&mut snapshot, &FsEvent::Created(tmp.path().join("b.txt")))
        .expect("translate");

    let h1 = hash_bytes(b"same bytes");
    assert_eq!(
        ops,
        vec![SyncOperation::Copy {
            src: "a.txt".into(),
            dst: "b.txt".into(),
            hash: h1.clone(),
        }]
    );
    let expected: Snapshot = [("a.txt", h1.as_str()), ("b.txt", h1.as_str())]
        .into_iter()
        .collect();
    assert_eq!(snapshot, expected);
}

#[test]
fn moved_file_leaves_no_source_key() {
    init_logging();
    let tmp = TempDir::new().expect("tmp");
    write(tmp.path(), "old/name.txt", b"payload");
    let mut snapshot = build(tmp.path(), &filter()).expect("build");
    let translator = EventTranslator::new(tmp.path(), filter());

    fs::create_dir_all(tmp.path().join("new")).expect("mkdir");
    fs::rename(tmp.path().join("old/name.txt"), tmp.path().join("new/name.txt")).expect("mv");
    let ops = translator
        .translate(
            &mut snapshot,
            &FsEvent::Moved {
                src: tmp.path().join("old/name.txt"),
                dst: tmp.path().join("new/name.txt"),
            },
        )
        .expect("translate");

    let h2 = hash_bytes(b"payload");
    assert_eq!(
        ops,
        vec![SyncOperation::Move {
            src: "old/name.txt".into(),
            dst: "new/name.txt".into(),
            hash: h2.clone(),
        }]
    );
    let expected: Snapshot = [("new/name.txt", h2.as_str())].into_iter().collect();
    assert_eq!(snapshot, expected);
}

#[test]
fn delete_of_unknown_path_does_not_fail() {
    let tmp = TempDir::new().expect("tmp");
    write(tmp.path(), "a.txt", b"alpha");
    let mut snapshot = build(tmp.path(), &filter()).expect("build");
    let before = snapshot.clone();
    let translator = EventTranslator::new(tmp.path(), filter());

    let ops = translator
        .translate(&mut snapshot, &FsEvent::Deleted(tmp.path().join("never.txt")))
        .expect("delete must not error");
    assert_eq!(ops, vec![SyncOperation::Delete { path: "never.txt".into() }]);
    assert_eq!(snapshot, before);
}

#[test]
fn rewrite_with_identical_bytes_still_emits_modify() {
    init_logging();
    let tmp = TempDir::new().expect("tmp");
    write(tmp.path(), "a.txt", b"alpha");
    let translator = EventTranslator::new(tmp.path(), filter());
    let mut snapshot = build(tmp.path(), &filter()).expect("build");

    write(tmp.path(), "a.txt", b"alpha");
    let ops = translator
        .translate(&mut snapshot, &FsEvent::Modified(tmp.path().join("a.txt")))
        .expect("translate");

    assert_eq!(
        ops,
        vec![SyncOperation::Modify {
            path: "a.txt".into(),
            hash: hash_bytes(b"alpha"),
        }]
    );
    assert_eq!(snapshot.get("a.txt"), Some(hash_bytes(b"alpha").as_str()));
}

#[test]
fn ignored_events_never_touch_the_snapshot() {
    let tmp = TempDir::new().expect("tmp");
    let translator = EventTranslator::new(tmp.path(), filter());
    let mut snapshot = Snapshot::new();

    write(tmp.path(), "draft.txt~", b"backup");
    write(tmp.path(), ".secret", b"hidden");
    for event in [
        FsEvent::Created(tmp.path().join("draft.txt~")),
        FsEvent::Modified(tmp.path().join(".secret")),
        FsEvent::Deleted(tmp.path().join("lock.odt#")),
    ] {
        assert!(translator.translate(&mut snapshot, &event).expect("translate").is_empty());
    }
    assert!(snapshot.is_empty());
}

#[test]
fn rename_from_hidden_temp_file_becomes_create() {
    let tmp = TempDir::new().expect("tmp");
    let translator = EventTranslator::new(tmp.path(), filter());
    let mut snapshot = Snapshot::new();

    write(tmp.path(), "saved.txt", b"editor output");
    let ops = translator
        .translate(
            &mut snapshot,
            &FsEvent::Moved {
                src: tmp.path().join(".goutputstream-XYZ"),
                dst: tmp.path().join("saved.txt"),
            },
        )
        .expect("translate");
    assert!(matches!(ops.as_slice(), [SyncOperation::Upload { path, .. }] if path == "saved.txt"));
    assert!(snapshot.contains_path("saved.txt"));
}

#[test]
fn vanished_file_is_an_error_and_snapshot_is_untouched() {
    let tmp = TempDir::new().expect("tmp");
    let translator = EventTranslator::new(tmp.path(), filter());
    let mut snapshot = Snapshot::new();

    let result = translator.translate(&mut snapshot, &FsEvent::Created(tmp.path().join("gone.txt")));
    assert!(result.is_err());
    assert!(snapshot.is_empty());
}

#[test]
fn moved_directory_moves_every_tracked_child() {
    let tmp = TempDir::new().expect("tmp");
    write(tmp.path(), "album/one.jpg", b"one");
    write(tmp.path(), "album/deep/two.jpg", b"two");
    write(tmp.path(), "keep.txt", b"keep");
    let mut snapshot = build(tmp.path(), &filter()).expect("build");
    let translator = EventTranslator::new(tmp.path(), filter());

    fs::rename(tmp.path().join("album"), tmp.path().join("photos")).expect("mv dir");
    let ops = translator
        .translate(
            &mut snapshot,
            &FsEvent::Moved {
                src: tmp.path().join("album"),
                dst: tmp.path().join("photos"),
            },
        )
        .expect("translate");

    assert_eq!(ops.len(), 2);
    assert!(ops.iter().all(|op| op.command() == "move"));
    assert_eq!(
        snapshot.sorted_paths(),
        vec!["keep.txt", "photos/deep/two.jpg", "photos/one.jpg"]
    );
}

#[test]
fn deleted_directory_deletes_every_tracked_child() {
    let tmp = TempDir::new().expect("tmp");
    write(tmp.path(), "trash/a.txt", b"a");
    write(tmp.path(), "trash/b.txt", b"b");
    let mut snapshot = build(tmp.path(), &filter()).expect("build");
    let translator = EventTranslator::new(tmp.path(), filter());

    fs::remove_dir_all(tmp.path().join("trash")).expect("rm dir");
    let ops = translator
        .translate(&mut snapshot, &FsEvent::Deleted(tmp.path().join("trash")))
        .expect("translate");
    assert_eq!(
        ops,
        vec![
            SyncOperation::Delete { path: "trash/a.txt".into() },
            SyncOperation::Delete { path: "trash/b.txt".into() },
        ]
    );
    assert!(snapshot.is_empty());
}

// ---------------------------------------------------------------------------
// Reconciliation partition
// ---------------------------------------------------------------------------

fn snap(pairs: &[(&str, &str)]) -> Snapshot {
    pairs.iter().copied().collect()
}

fn paths_of(ops: &[SyncOperation], command: &str) -> BTreeSet<String> {
    ops.iter()
        .filter(|op| op.command() == command)
        .map(|op| match op {
            SyncOperation::Upload { path, .. }
            | SyncOperation::Download { path }
            | SyncOperation::Modify { path, .. }
            | SyncOperation::Delete { path } => path.clone(),
            SyncOperation::Move { dst, .. } | SyncOperation::Copy { dst, .. } => dst.clone(),
        })
        .collect()
}

#[test]
fn reconciliation_matches_path_partition() {
    let cases = [
        (snap(&[]), snap(&[])),
        (snap(&[("a", "1")]), snap(&[])),
        (snap(&[]), snap(&[("a", "1")])),
        (
            snap(&[("a", "1"), ("b", "2"), ("c", "3")]),
            snap(&[("b", "2"), ("c", "X"), ("d", "4")]),
        ),
        (
            snap(&[("same", "1"), ("dup1", "9"), ("dup2", "9")]),
            snap(&[("same", "1"), ("dup2", "8"), ("new", "9")]),
        ),
    ];

    for (local, remote) in cases {
        let mut working = local.clone();
        let ops = reconcile(&mut working, &remote);

        let local_keys: BTreeSet<String> = local.sorted_paths().into_iter().map(String::from).collect();
        let remote_keys: BTreeSet<String> =
            remote.sorted_paths().into_iter().map(String::from).collect();
        let remote_only: BTreeSet<String> = remote_keys.difference(&local_keys).cloned().collect();
        let local_only: BTreeSet<String> = local_keys.difference(&remote_keys).cloned().collect();
        let divergent: BTreeSet<String> = local_keys
            .intersection(&remote_keys)
            .filter(|p| local.get(p) != remote.get(p))
            .cloned()
            .collect();

        assert_eq!(paths_of(&ops, "download"), remote_only);
        assert_eq!(paths_of(&ops, "upload"), local_only);
        assert_eq!(paths_of(&ops, "modify"), divergent);
        assert_eq!(ops.len(), remote_only.len() + local_only.len() + divergent.len());

        for path in &remote_only {
            assert_eq!(working.get(path), remote.get(path), "downloaded {path} recorded");
        }
        for op in &ops {
            if let SyncOperation::Modify { path, hash } = op {
                assert_eq!(Some(hash.as_str()), remote.get(path), "remote hash wins");
            }
        }
    }
}
