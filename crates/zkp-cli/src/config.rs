//! Configuration management for zkp-client
//!
//! Configuration is stored in TOML format.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/zkp/client.toml`
//! - Windows: `%APPDATA%\zkp\client.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use zkp_core::config::{ApiConfig, PairingConfig, ProtocolConfig, TimeoutConfig};
use zkp_core::ClientConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// CLI configuration
///
/// # Example TOML
///
/// ```toml
/// [api]
/// base_http_url = "https://zkp.example.com"
/// base_ws_url = "wss://zkp.example.com"
///
/// [protocol]
/// flavor = "fiatShamir"
/// coprime_width = 1024
///
/// [timeouts]
/// response_secs = 30
/// pairing_secs = 120
///
/// [pairing]
/// max_message_len = 65536
///
/// [device]
/// id = "3F2504E0-4F89-11D3-9A0C-0305E82C3301"
///
/// [storage]
/// path = ""  # Empty = default location
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub pairing: PairingConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Stable device identifier the secret is derived from
    #[serde(default)]
    pub id: Option<String>,
}

/// Secret store location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the key file (empty = default location)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Values given on the command line; these win over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub http_url: Option<String>,
    pub ws_url: Option<String>,
    pub coprime_width: Option<u64>,
    pub device_id: Option<String>,
    pub store_path: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub debug: Option<bool>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from custom path or default
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        match custom_path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("client.toml"))
    }

    /// Default location of the key file.
    pub fn default_store_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("keys.json"))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("io", "zkp", "zkp")
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool, ConfigError> {
        if let Some(path) = Self::default_path() {
            if !path.exists() {
                Self::default().save(&path)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(url) = &overrides.http_url {
            self.api.base_http_url = url.clone();
        }
        if let Some(url) = &overrides.ws_url {
            self.api.base_ws_url = url.clone();
        }
        if let Some(width) = overrides.coprime_width {
            self.protocol.coprime_width = width;
        }
        if let Some(id) = &overrides.device_id {
            self.device.id = Some(id.clone());
        }
        if let Some(path) = &overrides.store_path {
            self.storage.path = Some(path.clone());
        }
        if overrides.debug == Some(true) {
            self.logging.level = "debug".to_string();
        } else if overrides.verbose == Some(true) {
            self.logging.level = "info".to_string();
        }
        self
    }

    /// Settings handed to the core client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api: self.api.clone(),
            protocol: self.protocol.clone(),
            timeouts: self.timeouts.clone(),
            pairing: self.pairing.clone(),
        }
    }

    pub fn store_path(&self) -> Option<PathBuf> {
        self.storage
            .path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(Self::default_store_path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }
        if self.device.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(ConfigError::ValidationError("device.id must not be blank".to_string()));
        }
        self.client_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("client.toml");

        let mut config = Config::default();
        config.api.base_http_url = "https://zkp.example.com".to_string();
        config.device.id = Some("0F1E".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.api.base_http_url, "https://zkp.example.com");
        assert_eq!(loaded.device.id.as_deref(), Some("0F1E"));
        assert_eq!(loaded.protocol.coprime_width, 1024);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(&path, "[protocol]\ncoprime_width = 64\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.protocol.coprime_width, 64);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.api.base_ws_url, "ws://localhost:8080");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("client.toml");

        std::fs::write(&path, "[logging]\nlevel = \"loud\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ValidationError(_))));

        std::fs::write(&path, "[api]\nbase_http_url = \"nope\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ValidationError(_))));

        std::fs::write(&path, "[protocol\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = CliOverrides {
            http_url: Some("https://other.example".to_string()),
            coprime_width: Some(128),
            device_id: Some("ABCD".to_string()),
            debug: Some(true),
            ..CliOverrides::default()
        };
        let config = Config::default().with_overrides(&overrides);
        assert_eq!(config.api.base_http_url, "https://other.example");
        assert_eq!(config.api.base_ws_url, "ws://localhost:8080");
        assert_eq!(config.client_config().protocol.coprime_width, 128);
        assert_eq!(config.device.id.as_deref(), Some("ABCD"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_explicit_store_path() {
        let mut config = Config::default();
        config.storage.path = Some(PathBuf::from("/tmp/keys.json"));
        assert_eq!(config.store_path(), Some(PathBuf::from("/tmp/keys.json")));
    }
}
