//! Error types for syncbox-sync.

use std::path::PathBuf;

use thiserror::Error;

use syncbox_core::CoreError;

/// All errors that can arise from snapshot, translation and outbox operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Hashing or ignore-rule failure from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The watched root is missing or not a directory.
    #[error("watched root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// JSON serialization/deserialization error (outbox).
    #[error("outbox JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
