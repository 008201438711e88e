pub mod control;
pub mod daemon;

use std::path::PathBuf;

use anyhow::{Context, Result};

/// `~/.syncbox/config.json` unless overridden.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => {
            let home = dirs::home_dir().context("could not determine home directory")?;
            Ok(syncbox_core::paths::config_path(&home))
        }
    }
}
