//! Syncbox: folder synchronisation client.
//!
//! # Usage
//!
//! ```text
//! syncbox daemon start [--config <path>]
//! syncbox reguser <username> <password> [--address <host>] [--port <port>]
//! syncbox shutdown [--address <host>] [--port <port>]
//! syncbox send <command> <json-payload> [--address <host>] [--port <port>]
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

use commands::{
    control::{ControlTarget, RegisterArgs, SendArgs},
    daemon::DaemonCommand,
};

#[derive(Parser, Debug)]
#[command(
    name = "syncbox",
    version,
    about = "Keep a local folder in sync with a syncbox server",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the synchronisation daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Register a user on the server through the running daemon.
    Reguser(RegisterArgs),

    /// Ask the running daemon to shut down.
    Shutdown(ControlTarget),

    /// Forward a raw command and JSON payload to the daemon.
    Send(SendArgs),
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Reguser(args) => args.run(),
        Commands::Shutdown(target) => commands::control::shutdown(&target),
        Commands::Send(args) => args.run(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
