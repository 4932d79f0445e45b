//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tether_proto::{ConnectionDescriptor, TimeBoundary};
use thiserror::Error;

use super::accounts::AccountBlock;
use super::listen::ListenConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Upend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// WebSocket listen configuration.
    pub listen: ListenConfig,
    /// Timing policy announced to every Downend.
    #[serde(default)]
    pub time_boundary: TimeBoundary,
    /// Signon accounts.
    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountBlock>,
    /// Expiry sweeper configuration.
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// The descriptor sent in every upgrade response.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            self.server.upend_version.clone(),
            self.server.authentication_required,
            self.time_boundary,
        )
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name, used in logs.
    pub name: String,
    /// Version string announced in the descriptor.
    #[serde(default = "default_upend_version")]
    pub upend_version: String,
    /// Whether application traffic requires a signed-in session.
    #[serde(default = "default_true")]
    pub authentication_required: bool,
    /// Metrics and admin HTTP port (default: 9090, 0 disables).
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Expiry sweeper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    /// Milliseconds between sweeps (default: 1000).
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_upend_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

pub(super) fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[server]
name = "tether.test"

[listen]
address = "127.0.0.1:8080"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.upend_version, env!("CARGO_PKG_VERSION"));
        assert!(config.server.authentication_required);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.time_boundary, TimeBoundary::LENIENT);
        assert!(config.accounts.is_empty());
        assert_eq!(config.sweeper.interval(), Duration::from_secs(1));
    }

    #[test]
    fn time_boundary_section_overrides_defaults() {
        let toml = format!(
            "{MINIMAL}\n[time_boundary]\nping_interval_ms = 500\nsession_inactivity_maximum_ms = 0\n"
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.time_boundary.ping_interval(), Duration::from_millis(500));
        assert_eq!(config.time_boundary.session_inactivity_maximum(), Duration::ZERO);
        assert_eq!(config.time_boundary.pong_timeout(), Duration::from_millis(2_500));
    }

    #[test]
    fn invalid_time_boundary_is_a_parse_error() {
        let toml = format!(
            "{MINIMAL}\n[time_boundary]\nreconnect_delay_lower_ms = 5000\nreconnect_delay_upper_ms = 10\n"
        );
        assert!(toml::from_str::<Config>(&toml).is_err());
    }

    #[test]
    fn accounts_parse_as_array_of_tables() {
        let toml = format!(
            r#"{MINIMAL}
[[account]]
login = "alice"
password_hash = "$argon2id$x"

[[account]]
login = "bob"
password_hash = "$argon2id$y"
secondary_code = "424242"
"#
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].secondary_code.as_deref(), Some("424242"));
    }

    #[test]
    fn descriptor_reflects_server_section() {
        let toml = MINIMAL.replace("[server]\n", "[server]\nupend_version = \"7\"\nauthentication_required = false\n");
        let config: Config = toml::from_str(&toml).unwrap();
        let descriptor = config.descriptor();
        assert_eq!(descriptor.upend_version, "7");
        assert!(!descriptor.authentication_required);
        assert_eq!(descriptor.time_boundary, TimeBoundary::LENIENT);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.name, "tether.test");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn load_garbage_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[server\nname = ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
