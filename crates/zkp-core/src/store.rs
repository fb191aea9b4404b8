//! Secret store abstraction.
//!
//! Values are opaque bytes addressed by `(user_id, key)`. The platform
//! keychain is an external collaborator; [`InMemorySecretStore`] backs tests
//! and the pairing harness.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store name of the Fiat-Shamir witness `v`.
pub const FIAT_SHAMIR_KEY_V: &str = "FiatShamir-key-v";
/// Store name of the Fiat-Shamir modulus `n`.
pub const FIAT_SHAMIR_KEY_N: &str = "FiatShamir-key-n";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ============================================================================
// Store Trait
// ============================================================================

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Insert or replace a value.
    async fn upsert(&self, user_id: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Fetch a value; missing entries are [`StoreError::NotFound`].
    async fn get(&self, user_id: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn remove(&self, user_id: &str, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    entries: Arc<RwLock<HashMap<(String, String), Vec<u8>>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn upsert(&self, user_id: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert((user_id.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    async fn get(&self, user_id: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .await
            .get(&(user_id.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{user_id}/{key}")))
    }

    async fn remove(&self, user_id: &str, key: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .remove(&(user_id.to_string(), key.to_string()));
        Ok(())
    }
}
