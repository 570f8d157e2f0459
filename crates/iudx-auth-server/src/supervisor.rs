//! Worker supervision.
//!
//! The supervisor spawns one child process per worker slot, running this
//! same binary in worker mode, and restarts any child that exits. Children
//! that die shortly after starting are restarted with exponential backoff;
//! a child that stayed up for `min_uptime` resets its slot's backoff.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::task::JoinSet;

/// Restart behaviour for worker slots.
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Uptime after which a run counts as healthy.
    pub min_uptime: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            min_uptime: Duration::from_secs(10),
        }
    }
}

impl RestartPolicy {
    /// Delay before restart attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// How to launch a worker child.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Re-run the current executable in worker mode.
    pub fn current_exe(config: Option<PathBuf>) -> Result<Self> {
        let program = std::env::current_exe().context("cannot locate own executable")?;
        let mut args = Vec::new();
        if let Some(path) = config {
            args.push("--config".into());
            args.push(path.display().to_string());
        }
        args.push("worker".into());
        Ok(Self { program, args })
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .spawn()
    }
}

pub struct Supervisor {
    command: WorkerCommand,
    workers: usize,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(command: WorkerCommand, workers: usize, policy: RestartPolicy) -> Self {
        Self {
            command,
            workers,
            policy,
        }
    }

    /// Keep every slot populated until ctrl-c.
    pub async fn run(self) -> Result<()> {
        tracing::info!(workers = self.workers, "starting supervisor");

        let mut slots = JoinSet::new();
        for slot in 0..self.workers {
            slots.spawn(supervise_slot(slot, self.command.clone(), self.policy.clone()));
        }

        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                tracing::info!("shutting down workers");
            }
            Some(joined) = slots.join_next() => {
                // Slots only return when a worker cannot be spawned at all.
                joined.context("worker slot panicked")??;
            }
        }

        // Dropping the slot tasks drops their children, which kills them.
        slots.shutdown().await;
        Ok(())
    }
}

async fn supervise_slot(slot: usize, command: WorkerCommand, policy: RestartPolicy) -> Result<()> {
    let mut attempt = 0u32;

    loop {
        let started = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn worker {slot}"))?;
        tracing::info!(slot, pid = child.id(), "worker started");

        let status = child.wait().await;
        let uptime = started.elapsed();
        log_exit(slot, &status, uptime);

        if uptime >= policy.min_uptime {
            attempt = 0;
        }
        attempt = attempt.saturating_add(1);
        let delay = policy.delay_for_attempt(attempt);
        tracing::info!(slot, attempt, ?delay, "restarting worker");
        tokio::time::sleep(delay).await;
    }
}

fn log_exit(slot: usize, status: &std::io::Result<ExitStatus>, uptime: Duration) {
    match status {
        Ok(s) if s.success() => tracing::warn!(slot, ?uptime, "worker exited"),
        Ok(s) => tracing::error!(slot, ?uptime, code = ?s.code(), "worker failed"),
        Err(e) => tracing::error!(slot, ?uptime, "failed to wait on worker: {e}"),
    }
}
