//! Domain types for the syncbox client.
//!
//! Relative paths are `/`-separated `String`s rooted at the watched folder;
//! content hashes are lowercase hex MD5 digests. Both are opaque to the
//! snapshot itself.

use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Last known state of the watched tree: relative path → content hash.
///
/// A key is present iff the daemon believes a regular, non-ignored file
/// exists at that path. Several paths may share a hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(HashMap<String, String>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// Any tracked path other than `exclude` whose content hash is `hash`.
    ///
    /// When several paths share the hash the choice is arbitrary.
    pub fn path_with_hash(&self, hash: &str, exclude: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(path, h)| h.as_str() == hash && path.as_str() != exclude)
            .map(|(path, _)| path.as_str())
    }

    /// Insert or replace the hash for `path`, returning the previous hash.
    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) -> Option<String> {
        self.0.insert(path.into(), hash.into())
    }

    /// Remove `path`; absence is not an error.
    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.0.remove(path)
    }

    /// Tracked paths strictly beneath the directory `dir`, in lexical order.
    pub fn paths_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut paths: Vec<String> = self
            .0
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect();
        paths.sort_unstable();
        paths
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, String> {
        self.0.iter()
    }

    /// Tracked paths in lexical order.
    pub fn sorted_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.0.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

impl<P: Into<String>, H: Into<String>> FromIterator<(P, H)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (P, H)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(path, hash)| (path.into(), hash.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = (&'a String, &'a String);
    type IntoIter = hash_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Sync operations
// ---------------------------------------------------------------------------

/// A classified action to propagate to the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum SyncOperation {
    Upload { path: String, hash: String },
    Download { path: String },
    Modify { path: String, hash: String },
    Delete { path: String },
    Move { src: String, dst: String, hash: String },
    Copy { src: String, dst: String, hash: String },
}

impl SyncOperation {
    /// Remote command name for this operation.
    pub fn command(&self) -> &'static str {
        match self {
            SyncOperation::Upload { .. } => "upload",
            SyncOperation::Download { .. } => "download",
            SyncOperation::Modify { .. } => "modify",
            SyncOperation::Delete { .. } => "delete",
            SyncOperation::Move { .. } => "move",
            SyncOperation::Copy { .. } => "copy",
        }
    }

    /// Request body handed to the remote client alongside [`Self::command`].
    pub fn payload(&self) -> Value {
        match self {
            SyncOperation::Upload { path, hash } | SyncOperation::Modify { path, hash } => {
                json!({ "filepath": path, "md5": hash })
            }
            SyncOperation::Download { path } | SyncOperation::Delete { path } => {
                json!({ "filepath": path })
            }
            SyncOperation::Move { src, dst, hash } | SyncOperation::Copy { src, dst, hash } => {
                json!({ "src": src, "dst": dst, "md5": hash })
            }
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Upload { path, .. }
            | SyncOperation::Download { path }
            | SyncOperation::Modify { path, .. }
            | SyncOperation::Delete { path } => write!(f, "{} {path}", self.command()),
            SyncOperation::Move { src, dst, .. } | SyncOperation::Copy { src, dst, .. } => {
                write!(f, "{} {src} -> {dst}", self.command())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Daemon state
// ---------------------------------------------------------------------------

/// Lifecycle of the daemon: `down → started → stopped`, no re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    #[default]
    Down,
    Started,
    Stopped,
}

impl DaemonState {
    /// The serving loop keeps going only while this is true.
    pub fn is_running(self) -> bool {
        self == DaemonState::Started
    }

    pub fn start(self) -> Result<Self, CoreError> {
        match self {
            DaemonState::Down => Ok(DaemonState::Started),
            from => Err(CoreError::InvalidTransition {
                from,
                to: DaemonState::Started,
            }),
        }
    }

    /// `stopped` is reachable from every state and is terminal.
    pub fn stop(self) -> Self {
        DaemonState::Stopped
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Down => write!(f, "down"),
            DaemonState::Started => write!(f, "started"),
            DaemonState::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
