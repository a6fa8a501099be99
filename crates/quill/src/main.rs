//! Quill CLI entry point.
//!
//! Thin wrapper over `quill-core`: argument parsing, tracing setup, and
//! user-facing formatting live here; all behavior lives in the core crate.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod logging;

#[derive(Parser)]
#[command(
    name = "quill",
    version,
    about = "Administrative control plane for the quill logging service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current state of the quill service
    State,
    /// Set the administrative password
    SetPass,
    /// Set the listening address for the next start
    SetAddr {
        /// Listening address, [host]:port
        address: String,
        /// Restart the service if it is running
        #[arg(short = 'r', long)]
        restart: bool,
    },
    /// Show the configured address and the one actually in use
    GetAddr,
    /// Set the database connection for the next start
    SetDb {
        /// Connection descriptor, user:password@host[:port]
        descriptor: String,
        /// Restart the service if it is running
        #[arg(short = 'r', long)]
        restart: bool,
    },
    /// Show the configured database connection (credentials redacted)
    GetDb,
    /// Start the quill service
    Start {
        /// Listening address for this run, [host]:port
        #[arg(long)]
        addr: Option<String>,
        /// Database descriptor for this run, user:password@host[:port]
        #[arg(long)]
        db: Option<String>,
        /// Restart the service if it is already running
        #[arg(short = 'r', long)]
        restart: bool,
        /// Persist the given address/database before starting
        #[arg(short = 's', long)]
        save: bool,
    },
    /// Stop the quill service
    Stop,
    /// Run the worker process (used by the service manager)
    #[command(hide = true)]
    InnerStart {
        /// Listening address override
        #[arg(long)]
        addr: Option<String>,
        /// Database descriptor override
        #[arg(long)]
        db: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Command::InnerStart { .. }) {
        logging::init_worker();
    } else {
        logging::init_cli();
    }

    match commands::run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
