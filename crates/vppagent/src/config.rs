//! Configuration file support for the agent
//!
//! Loads and validates the agent configuration from a TOML file.
//! Default location: /etc/vppagent/vppagent.toml

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use vpp_binapi::Dialect;
use vpp_scheduler::SchedulerConfig;

use crate::error::{AgentError, Result};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vppagent/vppagent.toml";

/// Dataplane connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// VPP binary API socket
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Client name announced in the handshake
    #[serde(default = "default_client_name")]
    pub client_name: String,

    /// Per-request reply timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Talk to an in-process simulated dataplane of this release instead of
    /// the socket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulate: Option<Dialect>,
}

/// Reconciliation loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// YAML file holding the desired configuration
    #[serde(default = "default_desired_path")]
    pub desired_path: PathBuf,

    /// Interval between downstream resyncs in seconds, 0 disables them
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Interval between retries of failed items in seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
}

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub agent: LoopConfig,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/vpp/api.sock")
}

fn default_client_name() -> String {
    "vppagent".to_string()
}

fn default_request_timeout() -> u64 {
    1000
}

fn default_desired_path() -> PathBuf {
    PathBuf::from("/etc/vppagent/desired.yaml")
}

fn default_resync_interval() -> u64 {
    60
}

fn default_retry_interval() -> u64 {
    5
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            client_name: default_client_name(),
            request_timeout_ms: default_request_timeout(),
            simulate: None,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            desired_path: default_desired_path(),
            resync_interval_secs: default_resync_interval(),
            retry_interval_secs: default_retry_interval(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                AgentError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AgentError::Io(e)),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| AgentError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.request_timeout_ms)
    }

    /// Downstream resync interval, `None` when periodic resync is disabled
    pub fn resync_interval(&self) -> Option<Duration> {
        match self.agent.resync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.agent.retry_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.request_timeout_ms == 0 {
            return Err(AgentError::Config(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.connection.client_name.is_empty() || self.connection.client_name.len() > 63 {
            return Err(AgentError::Config(
                "client_name must be 1-63 bytes".to_string(),
            ));
        }

        if self.agent.retry_interval_secs == 0 {
            return Err(AgentError::Config(
                "retry_interval_secs must be > 0".to_string(),
            ));
        }

        self.scheduler.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpp_scheduler::{CachedDumpPolicy, ExternalItemPolicy};

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.connection.socket_path, PathBuf::from("/run/vpp/api.sock"));
        assert_eq!(config.connection.client_name, "vppagent");
        assert_eq!(config.connection.simulate, None);
        assert_eq!(config.agent.resync_interval_secs, 60);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_timeout() {
        let mut config = AgentConfig::default();
        config.connection.request_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_scheduler_config() {
        let mut config = AgentConfig::default();
        config.scheduler.max_attempts_per_txn = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AgentError::Scheduler(vpp_scheduler::SchedulerError::Config(_))
        ));
        assert!(err.to_string().contains("max_attempts_per_txn"));
    }

    #[test]
    fn test_durations() {
        let mut config = AgentConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.resync_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.retry_interval(), Duration::from_secs(5));

        config.agent.resync_interval_secs = 0;
        assert_eq!(config.resync_interval(), None);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[connection]
socket_path = "/tmp/vpp-api.sock"
simulate = "vpp1908"

[scheduler]
max_attempts_per_txn = 5
external_items = "adopt"
cached_dumps = "reapply"

[agent]
retry_interval_secs = 2
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.socket_path, PathBuf::from("/tmp/vpp-api.sock"));
        assert_eq!(config.connection.simulate, Some(Dialect::Vpp1908));
        assert_eq!(config.scheduler.max_attempts_per_txn, 5);
        assert_eq!(config.scheduler.external_items, ExternalItemPolicy::Adopt);
        assert_eq!(config.scheduler.cached_dumps, CachedDumpPolicy::Reapply);
        assert_eq!(config.agent.retry_interval_secs, 2);
        // Unspecified values should use defaults
        assert_eq!(config.connection.request_timeout_ms, 1000);
        assert_eq!(config.scheduler.max_total_attempts, 10);
        assert_eq!(config.agent.resync_interval_secs, 60);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vppagent.toml");

        let mut config = AgentConfig::default();
        config.connection.simulate = Some(Dialect::Vpp2001);
        config.agent.resync_interval_secs = 0;
        config.save(&path).unwrap();

        let loaded = AgentConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[connection\nsocket_path = 1").unwrap();
        assert!(matches!(
            AgentConfig::load_or_default(&path),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = AgentConfig::load_or_default("/nonexistent/vppagent.toml").unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let sample: AgentConfig = toml::from_str(include_str!("../../../config/vppagent.toml")).unwrap();
        assert_eq!(sample, AgentConfig::default());
    }
}
