//! Filesystem monitor: notify events in, [`FsEvent`]s out.
//!
//! The notify callback runs on the backend's own thread and only flattens
//! events into [`RawChange`]s on a bounded channel. Rename halves are paired
//! back together on the engine side by [`RenamePairer`].

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use syncbox_sync::FsEvent;

use crate::error::DaemonError;

/// One path-level change as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawChange {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
    RenamedFrom {
        path: PathBuf,
        tracker: Option<usize>,
    },
    RenamedTo {
        path: PathBuf,
        tracker: Option<usize>,
    },
    Renamed {
        src: PathBuf,
        dst: PathBuf,
    },
}

/// Flatten a notify event. Directory creation, metadata-only changes and
/// access events produce nothing.
pub fn raw_changes(event: &Event) -> Vec<RawChange> {
    let files = || event.paths.iter().filter(|path| !path.is_dir()).cloned();
    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => files().map(RawChange::Created).collect(),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            files().map(RawChange::Modified).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
            .paths
            .iter()
            .map(|path| RawChange::RenamedFrom {
                path: path.clone(),
                tracker: event.tracker(),
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .map(|path| RawChange::RenamedTo {
                path: path.clone(),
                tracker: event.tracker(),
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [src, dst] => vec![RawChange::Renamed {
                src: src.clone(),
                dst: dst.clone(),
            }],
            _ => Vec::new(),
        },
        // Backends that cannot tell the halves apart: look at what is left.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .map(|path| {
                if path.exists() {
                    RawChange::Created(path.clone())
                } else {
                    RawChange::Removed(path.clone())
                }
            })
            .collect(),
        EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(RawChange::Removed).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug)]
struct PendingRename {
    path: PathBuf,
    tracker: Option<usize>,
    seen_at: Instant,
}

/// Joins `from`/`to` rename halves into one [`FsEvent::Moved`].
///
/// A `from` half with no partner within `window` was moved out of the
/// watched tree and becomes a delete; an unpaired `to` half becomes a create.
#[derive(Debug)]
pub struct RenamePairer {
    window: Duration,
    pending: Vec<PendingRename>,
    last_pair: Option<(PathBuf, PathBuf)>,
}

impl RenamePairer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
            last_pair: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn push(&mut self, change: RawChange, now: Instant) -> Vec<FsEvent> {
        match change {
            RawChange::RenamedFrom { path, tracker } => {
                let events = self.flush_expired(now);
                self.pending.push(PendingRename {
                    path,
                    tracker,
                    seen_at: now,
                });
                self.last_pair = None;
                events
            }
            RawChange::RenamedTo { path, tracker } => {
                let partner = tracker.and_then(|tracker| {
                    self.pending
                        .iter()
                        .position(|pending| pending.tracker == Some(tracker))
                });
                let mut events = Vec::new();
                match partner {
                    Some(index) => {
                        let src = self.pending.remove(index).path;
                        self.last_pair = Some((src.clone(), path.clone()));
                        events.push(FsEvent::Moved { src, dst: path });
                    }
                    None => {
                        self.last_pair = None;
                        events.push(FsEvent::Created(path));
                    }
                }
                events
            }
            RawChange::Renamed { src, dst } => {
                // Some backends repeat an already paired rename as one event.
                if self.last_pair.as_ref() == Some(&(src.clone(), dst.clone())) {
                    self.last_pair = None;
                    return Vec::new();
                }
                self.pending.retain(|pending| pending.path != src);
                self.last_pair = None;
                vec![FsEvent::Moved { src, dst }]
            }
            RawChange::Created(path) => self.after_pending(FsEvent::Created(path)),
            RawChange::Modified(path) => self.after_pending(FsEvent::Modified(path)),
            RawChange::Removed(path) => self.after_pending(FsEvent::Deleted(path)),
        }
    }

    /// Turn `from` halves older than the window into deletes.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<FsEvent> {
        let window = self.window;
        let mut events = Vec::new();
        self.pending.retain(|pending| {
            if now.saturating_duration_since(pending.seen_at) >= window {
                events.push(FsEvent::Deleted(pending.path.clone()));
                false
            } else {
                true
            }
        });
        events
    }

    /// Unpaired halves must not be reordered behind later changes.
    fn after_pending(&mut self, event: FsEvent) -> Vec<FsEvent> {
        self.last_pair = None;
        let mut events: Vec<FsEvent> = self
            .pending
            .drain(..)
            .map(|pending| FsEvent::Deleted(pending.path))
            .collect();
        events.push(event);
        events
    }
}

/// Watch `root` recursively, feeding every change into `changes`.
///
/// Dropping the returned watcher stops the backend thread.
pub fn spawn_watcher(
    root: &Path,
    changes: mpsc::Sender<RawChange>,
) -> Result<RecommendedWatcher, DaemonError> {
    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            for change in raw_changes(&event) {
                // Closed channel: the engine is shutting down.
                if changes.blocking_send(change).is_err() {
                    break;
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "watcher event error"),
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching sharing folder");
    Ok(watcher)
}
