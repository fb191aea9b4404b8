//! Device-binding pairing cryptography.
//!
//! Both roles generate an ephemeral X25519 key pair, exchange public keys in
//! the SYN/ACK messages, and derive the same 32-byte symmetric key with
//! HKDF-SHA256 (fixed salt, empty info). Payloads after the handshake are
//! sealed with AES-256-GCM.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed HKDF salt for the pairing key. MUST NOT change once released.
pub const PAIRING_HKDF_SALT: &[u8] = b"zkp_device_binding_v1";

pub const PUBLIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PairingCryptoError {
    #[error("peer public key must be 32 bytes, got {0}")]
    InvalidPublicKeyLength(usize),
    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("invalid blob: too short")]
    InvalidBlob,
    #[error("RNG failed")]
    RngError,
}

/// Ephemeral key-agreement key pair, consumed by [`EphemeralKeyPair::agree`].
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public.to_bytes()
    }

    /// Run ECDH with the peer key and derive the pairing key.
    pub fn agree(self, peer_public: &[u8]) -> Result<PairingKey, PairingCryptoError> {
        let peer: [u8; PUBLIC_KEY_LEN] = peer_public
            .try_into()
            .map_err(|_| PairingCryptoError::InvalidPublicKeyLength(peer_public.len()))?;
        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(PairingCryptoError::NonContributory);
        }
        PairingKey::derive(shared.as_bytes())
    }
}

/// Symmetric key shared by both pairing roles. Wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PairingKey {
    key: [u8; 32],
}

impl std::fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PairingKey(..)")
    }
}

impl PairingKey {
    /// HKDF-SHA256(salt = PAIRING_HKDF_SALT, ikm = shared secret, info = empty), 32 bytes.
    pub fn derive(shared_secret: &[u8]) -> Result<Self, PairingCryptoError> {
        let hk = Hkdf::<Sha256>::new(Some(PAIRING_HKDF_SALT), shared_secret);
        let mut key = [0u8; 32];
        hk.expand(&[], &mut key)
            .map_err(|_| PairingCryptoError::KeyDerivation)?;
        Ok(Self { key })
    }

    /// Public fingerprint of the key, safe to log and compare out of band.
    pub fn fingerprint(&self) -> [u8; 8] {
        let digest = Sha256::digest(self.key);
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        out
    }

    /// Encrypt with a random nonce.
    ///
    /// Returns: nonce(12) || ciphertext+tag
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, PairingCryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut nonce).map_err(|_| PairingCryptoError::RngError)?;

        let ct = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &[] })
            .map_err(|_| PairingCryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Decrypt a blob produced by [`PairingKey::seal`].
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, PairingCryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(PairingCryptoError::InvalidBlob);
        }
        let (nonce, ct) = blob.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad: &[] })
            .map_err(|_| PairingCryptoError::DecryptionFailed)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}
