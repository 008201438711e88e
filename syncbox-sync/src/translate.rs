//! Filesystem event translator: classifies one change at a time into a
//! [`SyncOperation`] and applies it to the snapshot.
//!
//! The snapshot is updated before the operation is returned and is never
//! rolled back: it mirrors the local tree, remote delivery is best-effort.

use std::path::{Path, PathBuf};

use syncbox_core::{hash::hash_file, paths::relative_path, IgnoreFilter, Snapshot, SyncOperation};

use crate::error::SyncError;

/// A filesystem change reported by the watcher, with absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Moved { src: PathBuf, dst: PathBuf },
}

pub struct EventTranslator {
    root: PathBuf,
    filter: IgnoreFilter,
}

impl EventTranslator {
    pub fn new(root: impl Into<PathBuf>, filter: IgnoreFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Classify `event`, update `snapshot`, and return the operations to send.
    ///
    /// Ignored paths, paths outside the root and content-preserving
    /// modifications yield nothing. A file that cannot be hashed (e.g. already
    /// gone again) is an error and leaves `snapshot` untouched.
    ///
    /// A deleted or moved directory expands to one operation per tracked file
    /// beneath it.
    pub fn translate(
        &self,
        snapshot: &mut Snapshot,
        event: &FsEvent,
    ) -> Result<Vec<SyncOperation>, SyncError> {
        match event {
            FsEvent::Created(path) => {
                let Some(relative) = self.tracked(path) else {
                    return Ok(Vec::new());
                };
                let hash = hash_file(path)?;
                Ok(vec![classify_created(snapshot, relative, hash)])
            }
            FsEvent::Modified(path) => {
                let Some(relative) = self.tracked(path) else {
                    return Ok(Vec::new());
                };
                let hash = hash_file(path)?;
                Ok(vec![classify_modified(snapshot, relative, hash)])
            }
            FsEvent::Deleted(path) => {
                let Some(relative) = self.tracked(path) else {
                    return Ok(Vec::new());
                };
                let children = snapshot.paths_under(&relative);
                if !snapshot.contains_path(&relative) && !children.is_empty() {
                    return Ok(children
                        .into_iter()
                        .map(|child| classify_deleted(snapshot, child))
                        .collect());
                }
                Ok(vec![classify_deleted(snapshot, relative)])
            }
            FsEvent::Moved { src, dst } => match (self.tracked(src), self.tracked(dst)) {
                (Some(src_rel), Some(dst_rel)) if dst.is_dir() => {
                    self.translate_directory_move(snapshot, &src_rel, &dst_rel, dst)
                }
                (Some(src_rel), Some(dst_rel)) => {
                    let hash = hash_file(dst)?;
                    Ok(vec![classify_moved(snapshot, src_rel, dst_rel, hash)])
                }
                // Renamed into view, e.g. an editor's hidden temp file saved over.
                (None, Some(_)) => self.translate(snapshot, &FsEvent::Created(dst.clone())),
                (Some(_), None) => self.translate(snapshot, &FsEvent::Deleted(src.clone())),
                (None, None) => Ok(Vec::new()),
            },
        }
    }

    fn translate_directory_move(
        &self,
        snapshot: &mut Snapshot,
        src_rel: &str,
        dst_rel: &str,
        dst: &Path,
    ) -> Result<Vec<SyncOperation>, SyncError> {
        let mut operations = Vec::new();
        for child in snapshot.paths_under(src_rel) {
            let suffix = &child[src_rel.len() + 1..];
            let moved_to = format!("{dst_rel}/{suffix}");
            if self.filter.is_ignored(&moved_to) {
                operations.push(classify_deleted(snapshot, child));
                continue;
            }
            let hash = match hash_file(&dst.join(suffix)) {
                Ok(hash) => hash,
                Err(err) => {
                    tracing::warn!("skipping moved file: {err}");
                    continue;
                }
            };
            operations.push(classify_moved(snapshot, child, moved_to, hash));
        }
        Ok(operations)
    }

    fn tracked(&self, path: &Path) -> Option<String> {
        let relative = relative_path(&self.root, path)?;
        if let Some(rule) = self.filter.matching_rule(&relative) {
            tracing::debug!("ignored event path: {} (rule {rule})", path.display());
            return None;
        }
        Some(relative)
    }
}

/// A known hash elsewhere means copy; a known path means an out-of-order
/// modify; anything else is a new upload.
pub fn classify_created(snapshot: &mut Snapshot, path: String, hash: String) -> SyncOperation {
    let operation = if let Some(src) = snapshot.path_with_hash(&hash, &path) {
        SyncOperation::Copy {
            src: src.to_string(),
            dst: path.clone(),
            hash: hash.clone(),
        }
    } else if snapshot.contains_path(&path) {
        SyncOperation::Modify {
            path: path.clone(),
            hash: hash.clone(),
        }
    } else {
        SyncOperation::Upload {
            path: path.clone(),
            hash: hash.clone(),
        }
    };
    snapshot.insert(path, hash);
    operation
}

pub fn classify_modified(snapshot: &mut Snapshot, path: String, hash: String) -> SyncOperation {
    snapshot.insert(path.clone(), hash.clone());
    SyncOperation::Modify { path, hash }
}

pub fn classify_deleted(snapshot: &mut Snapshot, path: String) -> SyncOperation {
    if snapshot.remove(&path).is_none() {
        tracing::debug!("delete for untracked path: {path}");
    }
    SyncOperation::Delete { path }
}

pub fn classify_moved(
    snapshot: &mut Snapshot,
    src: String,
    dst: String,
    hash: String,
) -> SyncOperation {
    snapshot.insert(dst.clone(), hash.clone());
    if src != dst {
        snapshot.remove(&src);
    }
    SyncOperation::Move { src, dst, hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, &str)]) -> Snapshot {
        pairs.iter().copied().collect()
    }

    #[test]
    fn created_with_known_hash_is_copy() {
        let mut snapshot = snap(&[("a.txt", "H1")]);
        let op = classify_created(&mut snapshot, "b.txt".into(), "H1".into());
        assert_eq!(
            op,
            SyncOperation::Copy {
                src: "a.txt".into(),
                dst: "b.txt".into(),
                hash: "H1".into()
            }
        );
        assert_eq!(snapshot, snap(&[("a.txt", "H1"), ("b.txt", "H1")]));
    }

    #[test]
    fn created_on_tracked_path_is_modify() {
        let mut snapshot = snap(&[("a.txt", "H1")]);
        let op = classify_created(&mut snapshot, "a.txt".into(), "H2".into());
        assert_eq!(
            op,
            SyncOperation::Modify {
                path: "a.txt".into(),
                hash: "H2".into()
            }
        );
        assert_eq!(snapshot.get("a.txt"), Some("H2"));
    }

    #[test]
    fn created_with_own_hash_is_not_a_self_copy() {
        let mut snapshot = snap(&[("a.txt", "H1")]);
        let op = classify_created(&mut snapshot, "a.txt".into(), "H1".into());
        assert!(matches!(op, SyncOperation::Modify { .. }));
    }

    #[test]
    fn created_new_content_is_upload() {
        let mut snapshot = snap(&[("a.txt", "H1")]);
        let op = classify_created(&mut snapshot, "c.txt".into(), "H3".into());
        assert_eq!(
            op,
            SyncOperation::Upload {
                path: "c.txt".into(),
                hash: "H3".into()
            }
        );
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn modified_always_emits_and_stores_hash() {
        let mut snapshot = snap(&[("a.txt", "H1")]);
        let op = classify_modified(&mut snapshot, "a.txt".into(), "H1".into());
        assert_eq!(
            op,
            SyncOperation::Modify {
                path: "a.txt".into(),
                hash: "H1".into()
            }
        );
        let op = classify_modified(&mut snapshot, "a.txt".into(), "H2".into());
        assert!(matches!(op, SyncOperation::Modify { .. }));
        assert_eq!(snapshot.get("a.txt"), Some("H2"));
    }

    #[test]
    fn moved_replaces_source_key() {
        let mut snapshot = snap(&[("old/name.txt", "H2")]);
        let op = classify_moved(
            &mut snapshot,
            "old/name.txt".into(),
            "new/name.txt".into(),
            "H2".into(),
        );
        assert_eq!(
            op,
            SyncOperation::Move {
                src: "old/name.txt".into(),
                dst: "new/name.txt".into(),
                hash: "H2".into()
            }
        );
        assert_eq!(snapshot, snap(&[("new/name.txt", "H2")]));
    }

    #[test]
    fn deleting_untracked_path_leaves_snapshot_alone() {
        let mut snapshot = snap(&[("a.txt", "H1")]);
        let op = classify_deleted(&mut snapshot, "ghost.txt".into());
        assert_eq!(op, SyncOperation::Delete { path: "ghost.txt".into() });
        assert_eq!(snapshot, snap(&[("a.txt", "H1")]));
    }
}
