//! Error types for ZKP Core.
//!
//! `ProtocolError` covers registration, authentication and device binding
//! over the reliable channel. `BindingError` covers the pairing state
//! machines and is what binding delegates receive.

use std::time::Duration;

use thiserror::Error;

use zkp_crypto::fiat_shamir::KeyError;
use zkp_crypto::pairing::PairingCryptoError;
use zkp_transport::{ChannelError, FramingError, TransportFault};

use crate::config::ConfigError;
use crate::store::StoreError;

// ============================================================================
// Protocol engine
// ============================================================================

#[derive(Debug, Error, Clone)]
pub enum ProtocolError {
    /// The device identifier cannot be read right now (e.g. before first unlock).
    #[error("device secret unavailable: {0}")]
    UnavailableSecret(String),

    #[error("device secret could not be converted to an integer")]
    SecretConversionFailure,

    #[error("no public key stored for this device; register or bind first")]
    DeviceNotBound,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("verifier started verification without a challenge")]
    MissingChallenge,

    #[error("timed out after {0:?} waiting for the verifier")]
    Timeout(Duration),

    #[error("session cancelled")]
    Cancelled,

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registration request failed: {0}")]
    Registration(String),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

// ============================================================================
// Device binding
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("ack nonce mismatch: expected {expected}, got {received}")]
    ReceivedWrongAckNumber { expected: u64, received: u64 },

    #[error("failed to send data: {0}")]
    FailedToSendData(TransportFault),

    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("payload decryption failed")]
    DecryptionFailed,

    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    #[error("peer disconnected")]
    Disconnected,

    #[error("pairing timed out")]
    Timeout,

    #[error("invalid discovery URI: {0}")]
    InvalidDiscoveryUri(String),

    /// Binding reached the protocol engine, which failed or was rejected.
    #[error("binding not completed: {0}")]
    Protocol(String),
}

impl From<FramingError> for BindingError {
    fn from(e: FramingError) -> Self {
        BindingError::MalformedMessage(e.to_string())
    }
}

impl From<PairingCryptoError> for BindingError {
    fn from(e: PairingCryptoError) -> Self {
        match e {
            PairingCryptoError::DecryptionFailed | PairingCryptoError::InvalidBlob => {
                BindingError::DecryptionFailed
            }
            other => BindingError::KeyAgreement(other.to_string()),
        }
    }
}

impl From<ProtocolError> for BindingError {
    fn from(e: ProtocolError) -> Self {
        BindingError::Protocol(e.to_string())
    }
}
