//! INI-style configuration for the server and for client connections
//! (§6.2), with environment overrides (§6.3).
//!
//! A single `[QLocalSocket]`-style section would be overkill for a Unix-only
//! broker, so both config structs here load from a flat `key = value` INI
//! with no sections, which `toml` parses happily as long as every key lives
//! at the document root.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/user/pimd/broker.socket")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/pimd/storage.sqlite")
}

fn default_instance() -> String {
    "default".to_string()
}

/// Server-side configuration (`server.ini`, §6.2).
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default = "default_instance")]
    pub instance: String,

    /// Minimum interval, in seconds, between two scheduled syncs of the
    /// same collection (§4, C8).
    #[serde(default = "ServerConfig::default_min_sync_interval_secs")]
    pub min_sync_interval_secs: u64,

    /// Inline/external payload threshold in bytes (§4, C7).
    #[serde(default = "ServerConfig::default_external_payload_threshold")]
    pub external_payload_threshold: u64,
}

impl ServerConfig {
    const fn default_min_sync_interval_secs() -> u64 {
        5 * 60
    }

    const fn default_external_payload_threshold() -> u64 {
        4096
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_defaults() -> Self {
        let mut config = Self {
            socket_path: default_socket_path(),
            database_path: default_database_path(),
            instance: default_instance(),
            min_sync_interval_secs: Self::default_min_sync_interval_secs(),
            external_payload_threshold: Self::default_external_payload_threshold(),
        };
        config.apply_env_overrides();
        config
    }

    /// Applies the §6.3 environment overrides, which always win over a
    /// file value.
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = env::var("PIMD_SERVER_ADDRESS") {
            self.socket_path = PathBuf::from(address);
        }
        if let Ok(instance) = env::var("PIMD_INSTANCE") {
            self.instance = instance;
        }
    }
}

/// Client-side connection configuration (§6.2), read by `pimd-client` when
/// it is not handed an explicit socket path by its caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConnectionConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Path to write per-session protocol trace logs, or `None` to disable
    /// (§6.3, `PIMD_SESSION_LOGFILE`).
    #[serde(default)]
    pub session_logfile: Option<PathBuf>,

    /// Number of jobs the session pipelines to the broker at once before
    /// waiting for a response (§3, Session).
    #[serde(default = "ClientConnectionConfig::default_pipeline_depth")]
    pub pipeline_depth: usize,
}

impl ClientConnectionConfig {
    const fn default_pipeline_depth() -> usize {
        2
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_defaults() -> Self {
        let mut config = Self {
            socket_path: default_socket_path(),
            session_logfile: None,
            pipeline_depth: Self::default_pipeline_depth(),
        };
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(address) = env::var("PIMD_SERVER_ADDRESS") {
            self.socket_path = PathBuf::from(address);
        }
        if let Ok(logfile) = env::var("PIMD_SESSION_LOGFILE") {
            self.session_logfile = Some(PathBuf::from(logfile));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn server_config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "socket_path = \"/tmp/pimd.sock\"").unwrap();
        writeln!(file, "instance = \"work\"").unwrap();
        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/pimd.sock"));
        assert_eq!(config.instance, "work");
        assert_eq!(config.min_sync_interval_secs, 300);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "socket_path = \"/tmp/from-file.sock\"").unwrap();
        env::set_var("PIMD_SERVER_ADDRESS", "/tmp/from-env.sock");
        let config = ServerConfig::load(file.path()).unwrap();
        env::remove_var("PIMD_SERVER_ADDRESS");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/from-env.sock"));
    }

    #[test]
    fn defaults_are_usable_without_a_file() {
        let config = ServerConfig::from_defaults();
        assert_eq!(config.instance, "default");
        assert!(config.external_payload_threshold > 0);
    }
}
