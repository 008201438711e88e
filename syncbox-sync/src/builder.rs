//! Snapshot builder: one full walk of the watched tree at startup.

use std::path::Path;

use walkdir::WalkDir;

use syncbox_core::{hash::hash_file, paths::relative_path, IgnoreFilter, Snapshot};

use crate::error::SyncError;

/// Walk `root` recursively and hash every regular, non-ignored file.
///
/// Unreadable entries are skipped with a warning. The returned snapshot is
/// complete; callers swap it in wholesale.
pub fn build(root: &Path, filter: &IgnoreFilter) -> Result<Snapshot, SyncError> {
    if !root.is_dir() {
        return Err(SyncError::NotADirectory(root.to_path_buf()));
    }

    let mut snapshot = Snapshot::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        // Rules are prefix matches: an ignored directory hides its whole subtree.
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let rule = relative_path(root, entry.path())
                .and_then(|rel| filter.matching_rule(&rel).map(str::to_owned));
            match rule {
                Some(rule) => {
                    tracing::debug!("ignored directory: {} (rule {rule})", entry.path().display());
                    false
                }
                None => true,
            }
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("skipping unreadable entry: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };
        if let Some(rule) = filter.matching_rule(&relative) {
            tracing::debug!("ignored path: {} (rule {rule})", entry.path().display());
            continue;
        }
        match hash_file(entry.path()) {
            Ok(hash) => {
                snapshot.insert(relative, hash);
            }
            Err(err) => tracing::warn!("skipping unreadable file: {err}"),
        }
    }

    tracing::info!("built snapshot of {} files under {}", snapshot.len(), root.display());
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use syncbox_core::hash::hash_bytes;
    use tempfile::TempDir;

    use super::*;

    fn filter() -> IgnoreFilter {
        IgnoreFilter::with_defaults::<&str>(&[]).unwrap()
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = build(&tmp.path().join("nope"), &filter()).unwrap_err();
        assert!(matches!(err, SyncError::NotADirectory(_)));
    }

    #[test]
    fn empty_directories_contribute_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
        let snapshot = build(tmp.path(), &filter()).unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn nested_files_use_slash_relative_keys() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("a/b/deep.txt"), b"deep").unwrap();
        let snapshot = build(tmp.path(), &filter()).unwrap();
        assert_eq!(snapshot.get("a/b/deep.txt"), Some(hash_bytes(b"deep").as_str()));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let locked = tmp.path().join("locked.txt");
        fs::write(&locked, b"secret").unwrap();
        fs::write(tmp.path().join("open.txt"), b"open").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let snapshot = build(tmp.path(), &filter()).unwrap();
        assert!(snapshot.contains_path("open.txt"));
        // root can still read mode-000 files
        if fs::read(&locked).is_err() {
            assert!(!snapshot.contains_path("locked.txt"));
        }
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    }
}
