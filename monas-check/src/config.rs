//! Check service configuration
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! gives the stock tunables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration loaded from `--config <file.toml>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub fan_out: FanOutConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Timeout for dialling the target from the probe host
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,

    /// Upper bound on the provider-record search for one check
    #[serde(default = "default_provider_search_timeout_secs")]
    pub provider_search_timeout_secs: u64,

    /// How long to wait for a Bitswap answer
    #[serde(default = "default_availability_timeout_secs")]
    pub availability_timeout_secs: u64,

    /// Timeout for `/find-peer`
    #[serde(default = "default_find_peer_timeout_secs")]
    pub find_peer_timeout_secs: u64,

    /// Timeout for `/find`
    #[serde(default = "default_find_providers_timeout_secs")]
    pub find_providers_timeout_secs: u64,

    /// Most providers `/find` collects before finishing the query
    #[serde(default = "default_find_providers_limit")]
    pub find_providers_limit: usize,

    /// How often startup re-checks routing table readiness
    #[serde(default = "default_ready_poll_interval_secs")]
    pub ready_poll_interval_secs: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            fan_out: FanOutConfig::default(),
            network: NetworkConfig::default(),
            dial_timeout_secs: default_dial_timeout_secs(),
            provider_search_timeout_secs: default_provider_search_timeout_secs(),
            availability_timeout_secs: default_availability_timeout_secs(),
            find_peer_timeout_secs: default_find_peer_timeout_secs(),
            find_providers_timeout_secs: default_find_providers_timeout_secs(),
            find_providers_limit: default_find_providers_limit(),
            ready_poll_interval_secs: default_ready_poll_interval_secs(),
        }
    }
}

impl CheckConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.fan_out.min_success_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::InvalidValue(format!(
                "fan_out.min_success_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if self.fan_out.settle_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "fan_out.settle_interval_ms must be positive".to_string(),
            ));
        }
        if self.ready_poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "ready_poll_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn provider_search_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_search_timeout_secs)
    }

    pub fn availability_timeout(&self) -> Duration {
        Duration::from_secs(self.availability_timeout_secs)
    }

    pub fn find_peer_timeout(&self) -> Duration {
        Duration::from_secs(self.find_peer_timeout_secs)
    }

    pub fn find_providers_timeout(&self) -> Duration {
        Duration::from_secs(self.find_providers_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_secs(self.ready_poll_interval_secs)
    }
}

/// Tunables for the closest-peer fan-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Fraction of peers that must answer before the settle timer starts
    #[serde(default = "default_min_success_fraction")]
    pub min_success_fraction: f64,

    /// Shared deadline for every per-peer request
    #[serde(default = "default_per_op_timeout_secs")]
    pub per_op_timeout_secs: u64,

    /// Quiet period after the quorum is reached
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            min_success_fraction: default_min_success_fraction(),
            per_op_timeout_secs: default_per_op_timeout_secs(),
            settle_interval_ms: default_settle_interval_ms(),
        }
    }
}

impl FanOutConfig {
    pub fn per_op_timeout(&self) -> Duration {
        Duration::from_secs(self.per_op_timeout_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }
}

/// Routing node tunables that can be set from the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Routing table size required before the HTTP server starts
    #[serde(default = "default_ready_min_peers")]
    pub ready_min_peers: usize,

    #[serde(default = "default_max_established_connections")]
    pub max_established_connections: u32,

    /// Dial and store loopback / private addresses (local testing only)
    #[serde(default)]
    pub allow_private_addrs: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ready_min_peers: default_ready_min_peers(),
            max_established_connections: default_max_established_connections(),
            allow_private_addrs: false,
        }
    }
}

fn default_min_success_fraction() -> f64 {
    0.3
}

fn default_per_op_timeout_secs() -> u64 {
    3
}

fn default_settle_interval_ms() -> u64 {
    500
}

fn default_dial_timeout_secs() -> u64 {
    3
}

fn default_provider_search_timeout_secs() -> u64 {
    60
}

fn default_availability_timeout_secs() -> u64 {
    15
}

fn default_find_peer_timeout_secs() -> u64 {
    10
}

fn default_find_providers_timeout_secs() -> u64 {
    5
}

fn default_find_providers_limit() -> usize {
    20
}

fn default_ready_poll_interval_secs() -> u64 {
    10
}

fn default_ready_min_peers() -> usize {
    20
}

fn default_max_established_connections() -> u32 {
    900
}

/// Configuration error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = CheckConfig::default();
        assert_eq!(config.fan_out.min_success_fraction, 0.3);
        assert_eq!(config.fan_out.per_op_timeout(), Duration::from_secs(3));
        assert_eq!(config.fan_out.settle_interval(), Duration::from_millis(500));
        assert_eq!(config.dial_timeout(), Duration::from_secs(3));
        assert_eq!(config.provider_search_timeout(), Duration::from_secs(60));
        assert_eq!(config.availability_timeout(), Duration::from_secs(15));
        assert_eq!(config.find_peer_timeout(), Duration::from_secs(10));
        assert_eq!(config.find_providers_timeout(), Duration::from_secs(5));
        assert_eq!(config.find_providers_limit, 20);
        assert_eq!(config.ready_poll_interval(), Duration::from_secs(10));
        assert_eq!(config.network.ready_min_peers, 20);
        assert_eq!(config.network.max_established_connections, 900);
        assert!(!config.network.allow_private_addrs);
    }

    #[test]
    fn test_config_from_str() {
        let toml_content = r#"
dial_timeout_secs = 7

[fan_out]
min_success_fraction = 0.5
settle_interval_ms = 250

[network]
ready_min_peers = 1
allow_private_addrs = true
"#;

        let config = CheckConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.dial_timeout_secs, 7);
        assert_eq!(config.fan_out.min_success_fraction, 0.5);
        assert_eq!(config.fan_out.settle_interval_ms, 250);
        // untouched fields keep their defaults
        assert_eq!(config.fan_out.per_op_timeout_secs, 3);
        assert_eq!(config.availability_timeout_secs, 15);
        assert_eq!(config.network.ready_min_peers, 1);
        assert!(config.network.allow_private_addrs);
    }

    #[test]
    fn test_config_empty_str() {
        let config = CheckConfig::from_toml_str("").unwrap();
        assert_eq!(config.find_providers_timeout_secs, 5);
    }

    #[test]
    fn test_config_rejects_bad_fraction() {
        let err = CheckConfig::from_toml_str("[fan_out]\nmin_success_fraction = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = CheckConfig::from_toml_str("[fan_out]\nmin_success_fraction = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_config_parse_error() {
        let err = CheckConfig::from_toml_str("dial_timeout_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "find_peer_timeout_secs = 20").unwrap();

        let config = CheckConfig::from_file(file.path()).unwrap();
        assert_eq!(config.find_peer_timeout(), Duration::from_secs(20));

        let missing = CheckConfig::from_file("/nonexistent/ipfs-check.toml");
        assert!(matches!(missing, Err(ConfigError::IoError(_))));
    }
}
