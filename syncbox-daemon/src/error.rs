use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, control protocol and remote transport.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("core error: {0}")]
    Core(#[from] syncbox_core::CoreError),

    #[error("sync error: {0}")]
    Sync(#[from] syncbox_sync::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("control frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u32, max: u32 },

    #[error("lost connection with daemon")]
    ConnectionLost,

    #[error("remote server unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("daemon is not running (no listener at {address})")]
    DaemonNotRunning { address: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
