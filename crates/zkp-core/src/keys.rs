//! Fiat-Shamir key management.
//!
//! The private value `s` is never stored. It is re-derived on demand from the
//! platform device identifier and the user identifier, so the same device and
//! user always prove knowledge of the same `s`.

use std::sync::Arc;

use num_bigint::BigUint;
use rand::rngs::OsRng;
use tracing::{debug, info};
use zeroize::Zeroizing;

use zkp_crypto::fiat_shamir::{self, Modulus};

use crate::errors::ProtocolError;
use crate::payloads::PublicKey;

/// Source of the device-unique identifier the secret is derived from.
pub trait DeviceSecretSource: Send + Sync {
    /// `None` while the identifier is temporarily unavailable.
    fn device_id(&self) -> Option<String>;
}

/// Fixed device identifier, e.g. loaded from a file or supplied by the host app.
#[derive(Debug, Clone)]
pub struct StaticDeviceSecret {
    device_id: Option<String>,
}

impl StaticDeviceSecret {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
        }
    }

    /// A source whose identifier cannot be read.
    pub fn unavailable() -> Self {
        Self { device_id: None }
    }
}

impl DeviceSecretSource for StaticDeviceSecret {
    fn device_id(&self) -> Option<String> {
        self.device_id.clone()
    }
}

/// Derives Fiat-Shamir key material for one user on this device.
#[derive(Clone)]
pub struct FiatShamirKeyManager {
    coprime_width: u64,
    device: Arc<dyn DeviceSecretSource>,
    user_id: String,
}

impl std::fmt::Debug for FiatShamirKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiatShamirKeyManager")
            .field("coprime_width", &self.coprime_width)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl FiatShamirKeyManager {
    pub fn new(coprime_width: u64, device: Arc<dyn DeviceSecretSource>, user_id: impl Into<String>) -> Self {
        Self {
            coprime_width,
            device,
            user_id: user_id.into(),
        }
    }

    pub fn coprime_width(&self) -> u64 {
        self.coprime_width
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The prover's secret `s`, big-endian bytes.
    pub fn device_secret(&self) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        let device_id = self.device.device_id().ok_or_else(|| {
            ProtocolError::UnavailableSecret("device identifier not available yet".to_string())
        })?;
        let secret = derive_secret(&device_id, &self.user_id, self.coprime_width)?;
        Ok(Zeroizing::new(secret.to_bytes_be()))
    }

    /// Generate a fresh modulus and the matching witness `v = s^2 mod n`.
    ///
    /// Prime search runs on the blocking pool; it has no iteration cap.
    pub async fn generate_device_public_key(&self) -> Result<PublicKey, ProtocolError> {
        // Fail before spending time on primes
        let secret = self.device_secret()?;

        let width = self.coprime_width;
        info!(coprime_width = width, user_id = %self.user_id, "generating Fiat-Shamir modulus");
        let modulus = tokio::task::spawn_blocking(move || Modulus::generate(width, &mut OsRng))
            .await
            .map_err(|e| ProtocolError::TaskFailed(e.to_string()))??;

        let s = BigUint::from_bytes_be(&secret);
        let v = fiat_shamir::witness(&s, &modulus.n)?;
        debug!(n_bits = modulus.n.bits(), "generated device public key");
        Ok(PublicKey::from_parts(&v, &modulus.n))
    }
}

/// Build `s` from the device identifier and the user identifier.
///
/// The identifier (dashes stripped) is followed by the uppercase hex of the
/// user id's UTF-8 bytes. While the text is shorter than `width` bits it is
/// repeated `width / bits` more times and then padded with
/// `(width % bits) / 8` `'0'` characters. The result is read as base 16,
/// falling back to the stripped identifier as base 10.
pub fn derive_secret(device_id: &str, user_id: &str, width: u64) -> Result<BigUint, ProtocolError> {
    let stripped = device_id.replace('-', "");
    let seed = format!("{stripped}{}", hex::encode_upper(user_id.as_bytes()));
    let padded = pad_secret(&seed, width);

    BigUint::parse_bytes(padded.as_bytes(), 16)
        .or_else(|| BigUint::parse_bytes(stripped.as_bytes(), 10))
        .ok_or(ProtocolError::SecretConversionFailure)
}

fn pad_secret(seed: &str, width: u64) -> String {
    let bits = seed.len() as u64 * 8;
    if bits == 0 || bits >= width {
        return seed.to_string();
    }
    let repeats = (width / bits) as usize;
    let zeros = ((width % bits) / 8) as usize;
    let mut out = String::with_capacity(seed.len() * (repeats + 1) + zeros);
    for _ in 0..=repeats {
        out.push_str(seed);
    }
    out.extend(std::iter::repeat('0').take(zeros));
    out
}
