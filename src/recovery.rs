/// Recovery actions taken once the monitor has decided why to die.
///
/// Recovery is single-shot and best effort: kill the stale subject if one
/// was designated, run the effective recovery command once, and let the
/// process exit. A hung or failed recovery command is not this layer's
/// problem; an external hardware watchdog is the backstop.
use crate::monitor::TerminationReason;
use crate::registry::CommandRegistry;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct RecoveryExecutor {
    kill_pid: Option<i32>,
    kill_attempts: u32,
    kill_delay: Duration,
}

impl RecoveryExecutor {
    /// `kill_pid` designates a stale subject incarnation to SIGKILL before
    /// recovery; `kill_attempts`/`kill_delay` bound the retry loop.
    pub fn new(kill_pid: Option<i32>, kill_attempts: u32, kill_delay: Duration) -> Self {
        Self {
            kill_pid,
            kill_attempts,
            kill_delay,
        }
    }

    /// Perform recovery for the given reason. Returns when the daemon should
    /// exit; it never loops back into monitoring.
    pub async fn execute(&self, reason: TerminationReason, registry: &CommandRegistry) {
        if reason == TerminationReason::ShutdownRequested {
            info!("clean shutdown, no recovery action");
            return;
        }

        self.kill_stale().await;

        let command = registry.effective();
        if command.is_empty() {
            error!(%reason, "would run recovery command, none configured. terminating");
            return;
        }
        self.run_command(&command).await;
    }

    /// SIGKILL the designated stale process, retrying while it persists.
    /// A successful kill(2) means the process still existed; ESRCH means it
    /// is gone, which is what we want.
    async fn kill_stale(&self) {
        let Some(raw) = self.kill_pid else {
            return;
        };
        let pid = Pid::from_raw(raw);
        for attempt in 1..=self.kill_attempts {
            match kill(pid, Signal::SIGKILL) {
                Err(Errno::ESRCH) => {
                    debug!(%pid, attempt, "stale process is gone");
                    return;
                }
                Err(e) => {
                    warn!(%pid, error = %e, "unable to kill stale process");
                    return;
                }
                Ok(()) => {
                    debug!(%pid, attempt, "stale process still present after SIGKILL");
                    if attempt < self.kill_attempts {
                        tokio::time::sleep(self.kill_delay).await;
                    }
                }
            }
        }
        warn!(
            %pid,
            attempts = self.kill_attempts,
            "stale process did not exit after SIGKILL retries"
        );
    }

    /// Run the recovery command to completion through the shell. Failures
    /// are logged, never retried; the daemon exits either way.
    async fn run_command(&self, command: &str) {
        info!(%command, "running recovery command");
        match tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .status()
            .await
        {
            Ok(status) => {
                info!(%command, code = ?status.code(), "executed recovery command, terminating");
            }
            Err(e) => {
                error!(%command, error = %e, "failed to run recovery command");
            }
        }
    }
}
