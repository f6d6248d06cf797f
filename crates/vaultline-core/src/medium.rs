use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::error::VaultError;

/// Raw byte storage underneath the record store. Implementations know nothing about
/// envelopes, encryption or backups; they only move opaque bytes under string keys.
#[async_trait]
pub trait StorageMedium: Send + Sync {
    /// Persist a value under a key, replacing any existing entry atomically.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError>;

    /// Retrieve the value for a key, or `VaultError::NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, VaultError>;

    /// Remove a key and its value (idempotent).
    async fn delete(&self, key: &str) -> Result<(), VaultError>;

    /// List every key starting with `prefix`, in ascending order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, VaultError>;
}

/// In-memory medium for tests and ephemeral runs. Nothing is written to disk and
/// nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMedium {
    inner: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, VaultError> {
        self.inner.lock().map_err(|err| VaultError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl StorageMedium for InMemoryMedium {
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), VaultError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, VaultError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), VaultError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, VaultError> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
