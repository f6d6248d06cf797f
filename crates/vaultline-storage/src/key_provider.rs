use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{CryptoEngine, KEY_LEN};

/// Operator secret supplied out of band.
pub enum MasterSecret {
    /// Raw 256-bit key, installed with `CryptoEngine::set_key`.
    Key(Zeroizing<Vec<u8>>),
    /// Passphrase plus the persisted KDF salt; `None` means first run.
    Passphrase {
        passphrase: Zeroizing<String>,
        salt: Option<Vec<u8>>,
    },
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(_) => f.write_str("MasterSecret::Key(..)"),
            Self::Passphrase { salt, .. } => f
                .debug_struct("MasterSecret::Passphrase")
                .field("has_salt", &salt.is_some())
                .finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("secret unavailable: {0}")]
    Unavailable(String),
    #[error("engine rejected secret: {0}")]
    Engine(#[from] vaultline_core::VaultError),
}

/// Provides the operator's master secret (OS keychain or environment in production;
/// memory in tests).
#[async_trait]
pub trait MasterSecretProvider: Send + Sync {
    async fn master_secret(&self) -> Result<MasterSecret, KeyError>;
}

/// Feed a master secret into the engine. Returns the KDF salt to persist when the
/// secret was a passphrase.
pub fn install(engine: &CryptoEngine, secret: MasterSecret) -> Result<Option<Vec<u8>>, KeyError> {
    match secret {
        MasterSecret::Key(bytes) => {
            engine.set_key(&bytes)?;
            Ok(None)
        }
        MasterSecret::Passphrase {
            passphrase,
            salt: Some(salt),
        } => {
            engine.initialize_with_salt(&passphrase, &salt)?;
            Ok(Some(salt))
        }
        MasterSecret::Passphrase {
            passphrase,
            salt: None,
        } => {
            engine.initialize(&passphrase)?;
            debug!("derived master key with a fresh salt");
            Ok(engine.master_salt())
        }
    }
}

/// `install` on the blocking pool; passphrase secrets run Argon2.
pub async fn install_offloaded(
    engine: &Arc<CryptoEngine>,
    secret: MasterSecret,
) -> Result<Option<Vec<u8>>, KeyError> {
    let engine = Arc::clone(engine);
    tokio::task::spawn_blocking(move || install(&engine, secret))
        .await
        .map_err(|e| vaultline_core::VaultError::storage(format!("key setup worker failed: {e}")))?
}

/// OS keyring-backed provider. Keeps a random 256-bit master key in the keyring,
/// creating it on first use.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

#[async_trait]
impl MasterSecretProvider for KeyringProvider {
    async fn master_secret(&self) -> Result<MasterSecret, KeyError> {
        // Keyring operations are synchronous; wrap in async for trait compatibility.
        match keyring::Entry::new(&self.service, &self.account) {
            Ok(entry) => {
                if let Ok(secret) = entry.get_password() {
                    return decode_key(&secret).map(MasterSecret::Key);
                }

                let key = CryptoEngine::generate_random_key();
                entry
                    .set_password(&encode_key(&key))
                    .map_err(|e| KeyError::Keyring(e.to_string()))?;
                Ok(MasterSecret::Key(key))
            }
            Err(err) => Err(KeyError::Keyring(err.to_string())),
        }
    }
}

/// Passphrase read from an environment variable. The salt is supplied by the caller,
/// who persists it next to the data.
pub struct EnvPassphraseProvider {
    var: String,
    salt: Option<Vec<u8>>,
}

impl EnvPassphraseProvider {
    pub fn new(var: impl Into<String>, salt: Option<Vec<u8>>) -> Self {
        Self {
            var: var.into(),
            salt,
        }
    }
}

#[async_trait]
impl MasterSecretProvider for EnvPassphraseProvider {
    async fn master_secret(&self) -> Result<MasterSecret, KeyError> {
        let passphrase = std::env::var(&self.var)
            .map_err(|_| KeyError::Unavailable(format!("{} is not set", self.var)))?;
        if passphrase.is_empty() {
            return Err(KeyError::Unavailable(format!("{} is empty", self.var)));
        }
        Ok(MasterSecret::Passphrase {
            passphrase: Zeroizing::new(passphrase),
            salt: self.salt.clone(),
        })
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<Zeroizing<Vec<u8>>>>>,
}

#[async_trait]
impl MasterSecretProvider for InMemoryKeyProvider {
    async fn master_secret(&self) -> Result<MasterSecret, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Unavailable(format!("lock poisoned: {err}")))?;

        let key = guard
            .get_or_insert_with(CryptoEngine::generate_random_key)
            .clone();
        Ok(MasterSecret::Key(key))
    }
}

fn encode_key(key: &[u8]) -> String {
    general_purpose::STANDARD.encode(key)
}

fn decode_key(secret: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let bytes = general_purpose::STANDARD
        .decode(secret)
        .map_err(|e| KeyError::Decode(e.to_string()))?;

    if bytes.len() != KEY_LEN {
        return Err(KeyError::Decode(format!(
            "expected {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Zeroizing::new(bytes))
}
