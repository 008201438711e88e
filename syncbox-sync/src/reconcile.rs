//! Startup reconciliation of the local snapshot against the server's.

use syncbox_core::{Snapshot, SyncOperation};

/// Diff `local` against `remote` and return the catch-up operations.
///
/// - remote-only path → `download`, and `local` takes the remote hash right
///   away (the download is assumed to succeed);
/// - differing hashes → `modify` carrying the remote hash;
/// - local-only path → `upload`.
///
/// Operations are grouped by pass and sorted by path within each pass.
pub fn reconcile(local: &mut Snapshot, remote: &Snapshot) -> Vec<SyncOperation> {
    let mut downloads = Vec::new();
    let mut modifies = Vec::new();
    let mut uploads = Vec::new();

    for path in remote.sorted_paths() {
        let Some(remote_hash) = remote.get(path) else {
            continue;
        };
        match local.get(path) {
            None => downloads.push((path.to_string(), remote_hash.to_string())),
            Some(local_hash) if local_hash != remote_hash => {
                modifies.push(SyncOperation::Modify {
                    path: path.to_string(),
                    hash: remote_hash.to_string(),
                });
            }
            Some(_) => {}
        }
    }

    for path in local.sorted_paths() {
        if remote.contains_path(path) {
            continue;
        }
        if let Some(hash) = local.get(path) {
            uploads.push(SyncOperation::Upload {
                path: path.to_string(),
                hash: hash.to_string(),
            });
        }
    }

    let mut operations = Vec::with_capacity(downloads.len() + modifies.len() + uploads.len());
    for (path, hash) in downloads {
        local.insert(path.clone(), hash);
        operations.push(SyncOperation::Download { path });
    }
    operations.extend(modifies);
    operations.extend(uploads);

    tracing::info!("reconciliation planned {} operations", operations.len());
    operations
}
