/// Holder of the override recovery command.
///
/// The subject can install a recovery command at runtime; when none is
/// installed the daemon falls back to an environment variable. Only the
/// monitor loop mutates this, so there is no locking.
use std::env;

/// Environment variable consulted when no override is installed.
pub const DEFAULT_COMMAND_ENV: &str = "HEARTD_COMMAND";

pub struct CommandRegistry {
    override_cmd: Option<String>,
    env_var: String,
}

impl CommandRegistry {
    /// `env_var` names the variable holding the default recovery command.
    pub fn new(env_var: impl Into<String>) -> Self {
        Self {
            override_cmd: None,
            env_var: env_var.into(),
        }
    }

    /// Install an override. Last set wins.
    pub fn set(&mut self, command: String) {
        self.override_cmd = Some(command);
    }

    /// Drop the override; the environment default applies again.
    pub fn clear(&mut self) {
        self.override_cmd = None;
    }

    #[allow(dead_code)]
    pub fn has_override(&self) -> bool {
        self.override_cmd.is_some()
    }

    /// The command that would run on recovery: the override if set, else the
    /// environment default, else the empty string (meaning "none").
    pub fn effective(&self) -> String {
        self.override_cmd
            .clone()
            .or_else(|| env::var(&self.env_var).ok())
            .unwrap_or_default()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_ENV)
    }
}
