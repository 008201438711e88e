//! `syncbox daemon`: run the daemon in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use syncbox_daemon::start_blocking;

use super::resolve_config_path;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Build the snapshot, reconcile with the server, then watch and serve.
    Start {
        /// Config file (JSON, or YAML by extension).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start { config } => {
            let path = resolve_config_path(config)?;
            let state = start_blocking(&path).context("daemon exited with error")?;
            println!("daemon {state}");
        }
    }
    Ok(())
}
