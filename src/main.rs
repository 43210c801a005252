mod clock;
mod config;
mod monitor;
mod protocol;
mod recovery;
mod registry;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use clock::MonotonicClock;
use monitor::{Monitor, SpawnedReader};
use recovery::RecoveryExecutor;
use registry::CommandRegistry;

/// Liveness supervisor for a subject process. Expects periodic heartbeat
/// frames on stdin; when they stop, or the channel closes or errors, kills
/// the designated stale process, runs the configured recovery command, and
/// exits. Control frames on stdin can install, clear, or query an override
/// recovery command at runtime.
#[derive(Parser, Debug)]
#[command(name = "heartd", version, about)]
struct Cli {
    /// Heartbeat timeout in seconds (valid: 11-65535)
    #[arg(short = 't', long)]
    heartbeat_timeout: Option<u64>,

    /// Seconds between forced deadline checks when no frames arrive
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Pid of a stale subject incarnation to SIGKILL before recovery
    #[arg(short = 'p', long)]
    kill_pid: Option<i32>,

    /// SIGKILL retry attempts for the stale pid
    #[arg(long)]
    kill_attempts: Option<u32>,

    /// Seconds between SIGKILL retries
    #[arg(long)]
    kill_delay: Option<u64>,

    /// Config file path (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra logging (frame traffic, poll ticks)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// CLI flags win over the config file, which wins over defaults.
    fn apply_to(&self, config: &mut config::HeartdConfig) {
        if let Some(t) = self.heartbeat_timeout {
            config.monitor.heartbeat_timeout_secs = t;
        }
        if let Some(p) = self.poll_interval {
            config.monitor.poll_interval_secs = p;
        }
        if let Some(pid) = self.kill_pid {
            config.recovery.kill_pid = Some(pid);
        }
        if let Some(a) = self.kill_attempts {
            config.recovery.kill_attempts = a;
        }
        if let Some(d) = self.kill_delay {
            config.recovery.kill_delay_secs = d;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the protocol; all diagnostics go to stderr.
    let default_level = if cli.verbose || std::env::var_os("HEARTD_DEBUG").is_some() {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "could not load configuration");
            std::process::exit(1);
        }
    };
    cli.apply_to(&mut config);
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    tracing::info!(
        heartbeat_timeout_secs = config.monitor.heartbeat_timeout_secs,
        poll_interval_secs = config.monitor.poll_interval_secs,
        kill_pid = ?config.recovery.kill_pid,
        "heartd starting"
    );

    let mut registry = CommandRegistry::new(config.recovery.command_env.clone());
    let source = SpawnedReader::spawn(tokio::io::stdin());
    let mut monitor = Monitor::new(
        source,
        tokio::io::stdout(),
        MonotonicClock::new(),
        config.monitor.heartbeat_timeout_secs,
        Duration::from_secs(config.monitor.poll_interval_secs),
    );

    let reason = monitor.run(&mut registry).await;
    tracing::info!(%reason, "monitor terminated");

    let executor = RecoveryExecutor::new(
        config.recovery.kill_pid,
        config.recovery.kill_attempts,
        Duration::from_secs(config.recovery.kill_delay_secs),
    );
    executor.execute(reason, &registry).await;
}
