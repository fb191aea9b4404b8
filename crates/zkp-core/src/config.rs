//! Client configuration.
//!
//! Every section defaults, so a partial file (or none) yields a usable
//! configuration once endpoints are filled in.
//!
//! # Example TOML
//!
//! ```toml
//! [api]
//! base_http_url = "https://zkp.example.com"
//! base_ws_url = "wss://zkp.example.com"
//!
//! [protocol]
//! flavor = "fiatShamir"
//! coprime_width = 1024
//!
//! [timeouts]
//! response_secs = 30
//! pairing_secs = 120
//!
//! [pairing]
//! max_message_len = 65536
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use zkp_crypto::fiat_shamir::{MIN_COPRIME_WIDTH, RECOMMENDED_COPRIME_WIDTH};
use zkp_transport::{parse_endpoint, DEFAULT_MAX_MESSAGE_LEN};

use crate::flavor::{FiatShamirConfig, ZkpFlavor, FIAT_SHAMIR_NAME};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid endpoint {field}: {reason}")]
    InvalidEndpoint { field: &'static str, reason: String },

    #[error("unsupported protocol flavor: {0}")]
    UnsupportedFlavor(String),

    #[error("coprime width {0} is unusable (minimum 2)")]
    InvalidWidth(u64),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub pairing: PairingConfig,
}

/// Verifier endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL for one-shot HTTP requests (`{base}/register`)
    #[serde(default = "default_http_url")]
    pub base_http_url: String,

    /// Base URL for the authentication channel (`{base}/authenticate/`)
    #[serde(default = "default_ws_url")]
    pub base_ws_url: String,
}

fn default_http_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8080".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_http_url: default_http_url(),
            base_ws_url: default_ws_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Only "fiatShamir" is supported
    #[serde(default = "default_flavor")]
    pub flavor: String,

    /// Bit width of each prime factor of the modulus
    #[serde(default = "default_coprime_width")]
    pub coprime_width: u64,
}

fn default_flavor() -> String {
    FIAT_SHAMIR_NAME.to_string()
}

fn default_coprime_width() -> u64 {
    RECOMMENDED_COPRIME_WIDTH
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            flavor: default_flavor(),
            coprime_width: default_coprime_width(),
        }
    }
}

impl ProtocolConfig {
    /// Resolve the configured flavor tag.
    pub fn flavor(&self) -> Result<ZkpFlavor, ConfigError> {
        if self.flavor != FIAT_SHAMIR_NAME {
            return Err(ConfigError::UnsupportedFlavor(self.flavor.clone()));
        }
        Ok(ZkpFlavor::FiatShamir(FiatShamirConfig {
            coprime_width: self.coprime_width,
        }))
    }
}

/// Per-phase response windows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Wait for each verifier message
    #[serde(default = "default_response_secs")]
    pub response_secs: u64,

    /// Whole pairing handshake
    #[serde(default = "default_pairing_secs")]
    pub pairing_secs: u64,
}

fn default_response_secs() -> u64 {
    30
}

fn default_pairing_secs() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            response_secs: default_response_secs(),
            pairing_secs: default_pairing_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn response(&self) -> Duration {
        Duration::from_secs(self.response_secs)
    }

    pub fn pairing(&self) -> Duration {
        Duration::from_secs(self.pairing_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Upper bound of one reassembled pairing message
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

fn default_max_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration values.
    ///
    /// Widths below the recommended minimum are accepted with a warning;
    /// the caller owns that trade-off.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_endpoint(&self.api.base_http_url).map_err(|e| ConfigError::InvalidEndpoint {
            field: "api.base_http_url",
            reason: e.to_string(),
        })?;
        parse_endpoint(&self.api.base_ws_url).map_err(|e| ConfigError::InvalidEndpoint {
            field: "api.base_ws_url",
            reason: e.to_string(),
        })?;

        self.protocol.flavor()?;
        if self.protocol.coprime_width < MIN_COPRIME_WIDTH {
            return Err(ConfigError::InvalidWidth(self.protocol.coprime_width));
        }
        if self.protocol.coprime_width < RECOMMENDED_COPRIME_WIDTH {
            warn!(
                coprime_width = self.protocol.coprime_width,
                recommended = RECOMMENDED_COPRIME_WIDTH,
                "coprime width is below the recommended minimum; keys will be weak"
            );
        }

        if self.timeouts.response_secs == 0 || self.timeouts.pairing_secs == 0 {
            return Err(ConfigError::Validation("timeouts must be non-zero".to_string()));
        }
        if self.pairing.max_message_len == 0 {
            return Err(ConfigError::Validation(
                "pairing.max_message_len must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protocol.coprime_width, 1024);
        assert_eq!(config.timeouts.response(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"api": {"base_http_url": "https://zkp.example.com"}, "protocol": {"coprime_width": 64}}"#,
        )
        .unwrap();
        assert_eq!(config.api.base_http_url, "https://zkp.example.com");
        assert_eq!(config.api.base_ws_url, "ws://localhost:8080");
        assert_eq!(config.protocol.flavor, "fiatShamir");
        assert_eq!(config.pairing.max_message_len, 64 * 1024);
        // Weak but allowed
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.api.base_ws_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEndpoint { field: "api.base_ws_url", .. })
        ));

        let mut config = ClientConfig::default();
        config.protocol.coprime_width = 1;
        assert_eq!(config.validate(), Err(ConfigError::InvalidWidth(1)));

        let mut config = ClientConfig::default();
        config.protocol.flavor = "schnorr".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedFlavor("schnorr".to_string()))
        );

        let mut config = ClientConfig::default();
        config.timeouts.response_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
