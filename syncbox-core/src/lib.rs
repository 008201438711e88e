//! syncbox core library: snapshot model, sync operations, ignore rules,
//! configuration and content hashing.
//!
//! - [`types`]: [`Snapshot`], [`SyncOperation`], [`DaemonState`]
//! - [`ignore`]: [`IgnoreFilter`]
//! - [`config`]: [`Config`] load / defaults
//! - [`hash`]: MD5 content fingerprints
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::CoreError;
pub use ignore::IgnoreFilter;
pub use types::{DaemonState, Snapshot, SyncOperation};
