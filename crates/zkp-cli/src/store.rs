//! File-backed secret store.
//!
//! One JSON document, `{ user: { name: base64 } }`, rewritten on every change.
//! Public keys are what normally lands here; the device secret is derived and
//! never stored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use zkp_core::encoding;
use zkp_core::store::{SecretStore, StoreError};

type Document = BTreeMap<String, BTreeMap<String, String>>;

pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Document, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
            Err(e) => Err(StoreError::OperationFailed(e.to_string())),
        }
    }

    async fn write(&self, doc: &Document) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::OperationFailed(e.to_string()))?;
        }
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| StoreError::OperationFailed(e.to_string()))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn upsert(&self, user_id: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        doc.entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), encoding::encode(value));
        self.write(&doc).await?;
        debug!(user_id, key, path = %self.path.display(), "stored secret");
        Ok(())
    }

    async fn get(&self, user_id: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let _guard = self.lock.lock().await;
        let doc = self.read().await?;
        let value = doc
            .get(user_id)
            .and_then(|entries| entries.get(key))
            .ok_or_else(|| StoreError::NotFound(format!("{user_id}/{key}")))?;
        encoding::decode(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn remove(&self, user_id: &str, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let removed = doc
            .get_mut(user_id)
            .map(|entries| entries.remove(key).is_some())
            .unwrap_or(false);
        if removed {
            self.write(&doc).await?;
        }
        Ok(())
    }
}
