//! IUDX Auth server.
//!
//! Runs a supervisor that keeps `workers` worker processes alive. Every
//! worker binds the same listening address and serves newline-delimited
//! JSON request envelopes; see [`dispatch`] for the wire format.
//!
//! # Usage
//!
//! ```text
//! iudx-authd --config /etc/iudx/auth.toml            # supervisor
//! iudx-authd --config /etc/iudx/auth.toml worker     # a single worker
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Logs go to stderr.

mod dispatch;
mod supervisor;
mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use iudx_auth::AuthConfig;

use crate::supervisor::{RestartPolicy, Supervisor, WorkerCommand};
use crate::worker::Initializing;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "iudx-authd",
    about = "IUDX Auth server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Supervise worker processes (the default).
    Serve {
        /// Number of workers; overrides the configuration file.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Run a single worker in the foreground.
    Worker,
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;

    match cli.command.unwrap_or(Command::Serve { workers: None }) {
        Command::Serve { workers } => {
            let workers = workers.unwrap_or(config.workers).max(1);
            let command = WorkerCommand::current_exe(cli.config)?;
            let supervisor = Supervisor::new(command, workers, RestartPolicy::default());
            runtime.block_on(supervisor.run())
        }
        Command::Worker => runtime.block_on(async {
            let serving = Initializing::new(config).initialize()?;
            serving
                .run(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
        }),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<AuthConfig> {
    match path {
        Some(p) => AuthConfig::load(p)
            .with_context(|| format!("failed to load configuration from {}", p.display())),
        None => Ok(AuthConfig::default()),
    }
}
