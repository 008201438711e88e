//! Control-channel commands sent to a running daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use syncbox_core::Config;
use syncbox_daemon::{request_register_user, request_shutdown, send_passthrough, DaemonError};

use super::resolve_config_path;

/// Where the daemon listens. Flags win over the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ControlTarget {
    /// Control host (defaults to the config's `cmd_address`).
    #[arg(long)]
    pub address: Option<String>,

    /// Control port (defaults to the config's `cmd_port`).
    #[arg(long)]
    pub port: Option<u16>,

    /// Config file to read defaults from.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ControlTarget {
    pub fn resolve(&self) -> Result<String> {
        let (address, port) = match (&self.address, self.port) {
            (Some(address), Some(port)) => (address.clone(), port),
            _ => {
                let path = resolve_config_path(self.config.clone())?;
                let config = Config::load_at(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?;
                (
                    self.address.clone().unwrap_or(config.cmd_address),
                    self.port.unwrap_or(config.cmd_port),
                )
            }
        };
        Ok(format!("{address}:{port}"))
    }
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    pub username: String,
    pub password: String,

    #[command(flatten)]
    pub target: ControlTarget,
}

impl RegisterArgs {
    pub fn run(self) -> Result<()> {
        let address = self.target.resolve()?;
        let message = request_register_user(&address, &self.username, &self.password)
            .context("failed to register user")?;
        println!("{}", render_message(&message));
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Remote command name, e.g. `download`.
    pub command: String,

    /// JSON payload, e.g. '{"filepath": "a.txt"}'.
    pub payload: String,

    #[command(flatten)]
    pub target: ControlTarget,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let payload: Value = serde_json::from_str(&self.payload)
            .with_context(|| format!("payload is not valid JSON: {}", self.payload))?;
        let address = self.target.resolve()?;
        send_passthrough(&address, &self.command, payload)
            .with_context(|| format!("failed to send '{}'", self.command))?;
        println!("sent {}", self.command);
        Ok(())
    }
}

pub fn shutdown(target: &ControlTarget) -> Result<()> {
    let address = target.resolve()?;
    match request_shutdown(&address) {
        Ok(message) => println!("{}", render_message(&message)),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to shut down daemon"),
    }
    Ok(())
}

/// Strings print bare, anything else as JSON.
fn render_message(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
