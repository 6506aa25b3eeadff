//! Server configuration — bind endpoint and loop timing.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default bind interface (all interfaces, same as the desktop bundle).
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default RPC port.
pub const DEFAULT_PORT: u16 = 5555;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5000;

/// Socket and loop settings for the RPC server.
///
/// Loaded from a TOML file when one is given; any key left out falls back
/// to its default, so a config file only needs the fields it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind. Port 0 asks the OS for a free port.
    pub port: u16,
    /// Cadence at which the transport loop re-checks the running flag.
    pub poll_interval_ms: u64,
    /// How long stop and cleanup wait for the loop to exit.
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl ServerConfig {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Address string handed to the TCP bind call.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5555);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(5000));
        assert_eq!(config.bind_addr(), "0.0.0.0:5555");
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 6000\npoll_interval_ms = 100").unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.shutdown_grace_ms, 5000);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        assert!(ServerConfig::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ServerConfig::load(Path::new("/nonexistent/lectern.toml")).is_err());
    }
}
