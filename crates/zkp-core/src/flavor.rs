//! Supported zero-knowledge protocol flavors.
//!
//! The set is closed: adding a flavor means adding a variant here and in
//! [`ZeroKnowledgeProtocol`].

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::protocol::{FiatShamir, ProtocolContext, RegistrationOutcome, SessionHandle};

/// Wire name of the Fiat-Shamir flavor.
pub const FIAT_SHAMIR_NAME: &str = "fiatShamir";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiatShamirConfig {
    /// Bit width of each prime factor. Caller-supplied; not clamped.
    pub coprime_width: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZkpFlavor {
    FiatShamir(FiatShamirConfig),
}

impl ZkpFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            ZkpFlavor::FiatShamir(_) => FIAT_SHAMIR_NAME,
        }
    }

    /// Instantiate the protocol for this flavor.
    pub fn build(&self, ctx: ProtocolContext) -> ZeroKnowledgeProtocol {
        match *self {
            ZkpFlavor::FiatShamir(config) => ZeroKnowledgeProtocol::FiatShamir(FiatShamir::new(config, ctx)),
        }
    }
}

pub enum ZeroKnowledgeProtocol {
    FiatShamir(FiatShamir),
}

impl ZeroKnowledgeProtocol {
    pub async fn register(&self, payload: &[u8]) -> Result<RegistrationOutcome, ProtocolError> {
        match self {
            ZeroKnowledgeProtocol::FiatShamir(fs) => fs.register(payload).await,
        }
    }

    pub async fn authenticate(&self, payload: &[u8]) -> Result<SessionHandle, ProtocolError> {
        match self {
            ZeroKnowledgeProtocol::FiatShamir(fs) => fs.authenticate(payload).await,
        }
    }

    pub async fn bind_device(
        &self,
        payload: &[u8],
        other_device_key: &[u8],
    ) -> Result<SessionHandle, ProtocolError> {
        match self {
            ZeroKnowledgeProtocol::FiatShamir(fs) => fs.bind_device(payload, other_device_key).await,
        }
    }

    pub async fn fetch_device_key(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ZeroKnowledgeProtocol::FiatShamir(fs) => fs.fetch_device_key().await,
        }
    }

    pub async fn offer_device_key(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ZeroKnowledgeProtocol::FiatShamir(fs) => fs.offer_device_key().await,
        }
    }

    pub async fn store_device_key(&self, key: &[u8]) -> Result<(), ProtocolError> {
        match self {
            ZeroKnowledgeProtocol::FiatShamir(fs) => fs.store_serialized_key(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_name_and_config_wire_form() {
        let config = FiatShamirConfig { coprime_width: 1024 };
        assert_eq!(ZkpFlavor::FiatShamir(config).name(), "fiatShamir");
        assert_eq!(
            serde_json::to_string(&config).unwrap(),
            r#"{"coprimeWidth":1024}"#
        );
    }
}
