//! Error types for syncbox-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::DaemonState;

/// All errors that can arise from configuration, ignore rules and hashing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure, annotated with the offending path.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON config file could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    ConfigJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// YAML config file could not be parsed.
    #[error("failed to parse config at {path}: {source}")]
    ConfigYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An ignore rule is not a valid regular expression.
    #[error("invalid ignore pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// `dirs::home_dir()` returned `None` and no `state_dir` was configured.
    #[error("cannot determine home directory; set $HOME or configure state_dir")]
    HomeNotFound,

    #[error("invalid daemon state transition {from} -> {to}")]
    InvalidTransition { from: DaemonState, to: DaemonState },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}
