use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::registry::DEFAULT_COMMAND_ENV;

/// Top-level configuration, loaded from an optional heartd.toml and then
/// overridden by CLI flags.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HeartdConfig {
    pub monitor: MonitorConfig,
    pub recovery: RecoveryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Maximum gap in seconds between heartbeats. Valid: 11..=65535.
    pub heartbeat_timeout_secs: u64,
    /// How often the deadline check runs when no frames arrive.
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Pid of a stale subject incarnation to SIGKILL before recovery.
    pub kill_pid: Option<i32>,
    /// SIGKILL retry attempts while the stale process persists.
    pub kill_attempts: u32,
    /// Seconds between SIGKILL retries.
    pub kill_delay_secs: u64,
    /// Environment variable consulted for the default recovery command.
    pub command_env: String,
}

// --- Default implementations ---

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
            poll_interval_secs: 5,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            kill_pid: None,
            kill_attempts: 5,
            kill_delay_secs: 1,
            command_env: DEFAULT_COMMAND_ENV.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Heartbeat timeout outside the accepted range.
    InvalidTimeout {
        value: u64,
    },
    /// Poll interval of zero would spin the monitor loop.
    InvalidPollInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::InvalidTimeout { value } => {
                write!(
                    f,
                    "heartbeat timeout {} out of range (must be >10 and <=65535)",
                    value
                )
            }
            ConfigError::InvalidPollInterval => {
                write!(f, "poll interval must be at least 1 second")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Load configuration from the given file, or defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<HeartdConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(HeartdConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

impl HeartdConfig {
    /// Reject values the protocol cannot represent or the loop cannot run
    /// with. The original silently ignored out-of-range timeouts; rejecting
    /// loudly is kinder to operators.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.monitor.heartbeat_timeout_secs;
        if t <= 10 || t > 65535 {
            return Err(ConfigError::InvalidTimeout { value: t });
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_original_constants() {
        let config = HeartdConfig::default();
        assert_eq!(config.monitor.heartbeat_timeout_secs, 60);
        assert_eq!(config.monitor.poll_interval_secs, 5);
        assert_eq!(config.recovery.kill_pid, None);
        assert_eq!(config.recovery.kill_attempts, 5);
        assert_eq!(config.recovery.kill_delay_secs, 1);
        assert_eq!(config.recovery.command_env, "HEARTD_COMMAND");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_path_gives_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config.monitor.heartbeat_timeout_secs, 60);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartd.toml");
        std::fs::write(
            &path,
            "[monitor]\nheartbeat_timeout_secs = 120\n\n[recovery]\nkill_pid = 4321\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.monitor.heartbeat_timeout_secs, 120);
        assert_eq!(config.monitor.poll_interval_secs, 5);
        assert_eq!(config.recovery.kill_pid, Some(4321));
        assert_eq!(config.recovery.kill_attempts, 5);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/heartd.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartd.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_timeout_range_boundaries() {
        let mut config = HeartdConfig::default();
        config.monitor.heartbeat_timeout_secs = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout { value: 10 })
        ));
        config.monitor.heartbeat_timeout_secs = 11;
        assert!(config.validate().is_ok());
        config.monitor.heartbeat_timeout_secs = 65535;
        assert!(config.validate().is_ok());
        config.monitor.heartbeat_timeout_secs = 65536;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = HeartdConfig::default();
        config.monitor.poll_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
    }
}
