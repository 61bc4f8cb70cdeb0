//! Configuration loading
//!
//! The binary reads one TOML file with `[server]`, `[relay]`, `[auth]` and
//! `[api]` sections. Every section and every key is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::api::ApiConfig;
use crate::auth::AuthConfig;
use crate::registry::RelayConfig;
use crate::server::ServerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub auth: AuthConfig,
    pub api: ApiConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse configuration file
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// Authenticator could not be constructed
    #[error("invalid auth configuration: {0}")]
    Auth(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.address, "localhost:1337");
        assert_eq!(config.relay.packet_size, 1316);
        assert_eq!(config.auth, AuthConfig::AllowAll);
        assert!(!config.api.enabled);
    }

    #[test]
    fn test_full_file() {
        let toml = r#"
[server]
address = "127.0.0.1:9000"
public_address = "relay.example.com:9000"
sync_clients = true
auth_timeout_ms = 250
idle_timeout_ms = 0

[relay]
buffer_size = 131600
packet_size = 1316

[auth]
type = "static"
allow = ["play/*", "publish/cam-*"]

[api]
enabled = true
address = "127.0.0.1:8080"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9000");
        assert_eq!(config.server.public_address, "relay.example.com:9000");
        assert!(config.server.sync_clients);
        assert_eq!(config.server.auth_timeout_ms, 250);
        assert_eq!(config.server.idle_timeout(), None);
        assert_eq!(config.server.late_packet_threshold, 144);
        assert_eq!(config.relay.queue_capacity(), 100);
        assert!(matches!(config.auth, AuthConfig::Static { ref allow } if allow.len() == 2));
        assert!(config.api.enabled);
        assert_eq!(config.api.address, "127.0.0.1:8080");
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/nonexistent/ts-relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/ts-relay.toml"));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let path = std::env::temp_dir().join(format!("ts-relay-bad-{}.toml", std::process::id()));
        std::fs::write(&path, "[server\naddress = 1").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
