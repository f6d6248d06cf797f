use std::sync::{Arc, RwLock};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use vaultline_core::error::{CryptoFailure, VaultError, VaultResult};
use zeroize::Zeroizing;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
/// 96-bit GCM nonce.
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const ALGORITHM: &str = "aes-256-gcm";

/// HKDF info string binding per-payload keys to their purpose.
const MASTER_KEY_INFO: &[u8] = b"vaultline/payload-key/v1";

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Lowest cost argon2 accepts. Only for tests and throwaway stores.
    pub fn minimal() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Ciphertext plus everything needed to re-derive the key and check authenticity.
/// All binary fields are standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
    pub salt: String,
    pub algorithm: String,
}

struct MasterKey {
    key: Zeroizing<[u8; KEY_LEN]>,
    /// Present when the key came from a passphrase; `None` for raw keys.
    salt: Option<[u8; SALT_LEN]>,
}

/// Authenticated encryption, key derivation and hashing.
///
/// Payloads encrypted with an explicit password use an Argon2id key derived from
/// that password and the payload salt. Payloads encrypted without one use the
/// master key expanded through HKDF-SHA256 with the payload salt, so every payload
/// still gets its own key.
pub struct CryptoEngine {
    params: KdfParams,
    master: RwLock<Option<MasterKey>>,
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("params", &self.params)
            .field("has_key", &self.has_key())
            .finish()
    }
}

impl Default for CryptoEngine {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

impl CryptoEngine {
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            master: RwLock::new(None),
        }
    }

    /// Derive the master key from `password` with a fresh random salt.
    #[instrument(skip_all)]
    pub fn initialize(&self, password: &str) -> VaultResult<()> {
        let salt = random_array::<SALT_LEN>();
        self.initialize_with_salt(password, &salt)
    }

    /// Derive the master key from `password` and a previously persisted salt, so
    /// the same passphrase yields the same key across restarts.
    #[instrument(skip_all)]
    pub fn initialize_with_salt(&self, password: &str, salt: &[u8]) -> VaultResult<()> {
        if salt.len() != SALT_LEN {
            return Err(VaultError::Validation(format!(
                "salt must be {SALT_LEN} bytes, got {}",
                salt.len()
            )));
        }
        let key = self.derive_key(password, salt)?;
        let mut stored_salt = [0u8; SALT_LEN];
        stored_salt.copy_from_slice(salt);
        *self.master.write().unwrap_or_else(|e| e.into_inner()) = Some(MasterKey {
            key,
            salt: Some(stored_salt),
        });
        debug!("master key derived");
        Ok(())
    }

    /// Install a raw master key. Anything but `KEY_LEN` bytes is rejected.
    pub fn set_key(&self, key: &[u8]) -> VaultResult<()> {
        if key.len() != KEY_LEN {
            return Err(VaultError::Crypto(CryptoFailure::InvalidKeyLength));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(key);
        *self.master.write().unwrap_or_else(|e| e.into_inner()) = Some(MasterKey {
            key: bytes,
            salt: None,
        });
        Ok(())
    }

    pub fn has_key(&self) -> bool {
        self.master
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Salt used by the last `initialize*` call, if the master key came from a passphrase.
    pub fn master_salt(&self) -> Option<Vec<u8>> {
        self.master
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|m| m.salt.map(|s| s.to_vec()))
    }

    /// Argon2id(password, salt). Deterministic for identical inputs.
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
        if password.is_empty() {
            return Err(VaultError::Validation("password must not be empty".into()));
        }
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|_| VaultError::Crypto(CryptoFailure::KeyDerivation))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut out[..])
            .map_err(|_| VaultError::Crypto(CryptoFailure::KeyDerivation))?;
        Ok(out)
    }

    /// Encrypt `plaintext` under `password`, or under the master key when `password` is `None`.
    pub fn encrypt(&self, plaintext: &[u8], password: Option<&str>) -> VaultResult<EncryptedPayload> {
        if plaintext.is_empty() {
            return Err(VaultError::Validation("plaintext must not be empty".into()));
        }

        let salt = random_array::<SALT_LEN>();
        let iv = random_array::<IV_LEN>();
        let key = self.resolve_key(password, &salt)?;

        let cipher = Aes256Gcm::new_from_slice(&key[..])
            .map_err(|_| VaultError::Crypto(CryptoFailure::EncryptionFailed))?;
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| VaultError::Crypto(CryptoFailure::EncryptionFailed))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(EncryptedPayload {
            ciphertext: STANDARD.encode(&sealed),
            iv: STANDARD.encode(iv),
            auth_tag: STANDARD.encode(tag),
            salt: STANDARD.encode(salt),
            algorithm: ALGORITHM.to_string(),
        })
    }

    /// Verify and decrypt. Every failure after key resolution, including malformed
    /// fields, surfaces as the same `DecryptionFailed`.
    pub fn decrypt(
        &self,
        payload: &EncryptedPayload,
        password: Option<&str>,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        const FAILED: VaultError = VaultError::Crypto(CryptoFailure::DecryptionFailed);

        if payload.algorithm != ALGORITHM {
            return Err(FAILED);
        }
        let decode = |field: &str| STANDARD.decode(field).map_err(|_| FAILED);
        let mut sealed = decode(&payload.ciphertext)?;
        let iv = decode(&payload.iv)?;
        let tag = decode(&payload.auth_tag)?;
        let salt = decode(&payload.salt)?;
        if sealed.is_empty() || iv.len() != IV_LEN || tag.len() != TAG_LEN || salt.is_empty() {
            return Err(FAILED);
        }

        let key = self.resolve_key(password, &salt).map_err(|err| match err {
            VaultError::Crypto(CryptoFailure::NoKeyMaterial) => err,
            _ => FAILED,
        })?;
        let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| FAILED)?;

        sealed.extend_from_slice(&tag);
        cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| FAILED)
    }

    /// `encrypt` on the blocking pool; Argon2 must not stall the async workers.
    pub async fn encrypt_offloaded(
        self: &Arc<Self>,
        plaintext: Zeroizing<Vec<u8>>,
        password: Option<Zeroizing<String>>,
    ) -> VaultResult<EncryptedPayload> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            engine.encrypt(&plaintext, password.as_deref().map(String::as_str))
        })
        .await
        .map_err(|e| VaultError::storage(format!("crypto worker failed: {e}")))?
    }

    /// `decrypt` on the blocking pool.
    pub async fn decrypt_offloaded(
        self: &Arc<Self>,
        payload: EncryptedPayload,
        password: Option<Zeroizing<String>>,
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            engine.decrypt(&payload, password.as_deref().map(String::as_str))
        })
        .await
        .map_err(|e| VaultError::storage(format!("crypto worker failed: {e}")))?
    }

    /// Lowercase hex SHA-256 digest.
    pub fn generate_hash(data: impl AsRef<[u8]>) -> String {
        hex::encode(Sha256::digest(data.as_ref()))
    }

    pub fn verify_hash(data: impl AsRef<[u8]>, hash: &str) -> bool {
        Self::generate_hash(data).eq_ignore_ascii_case(hash)
    }

    pub fn generate_random_key() -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(vec![0u8; KEY_LEN]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        bytes
    }

    /// Zero and drop the master key.
    pub fn clear_sensitive_data(&self) {
        let previous = self.master.write().unwrap_or_else(|e| e.into_inner()).take();
        if previous.is_some() {
            debug!("master key wiped");
        }
    }

    fn resolve_key(&self, password: Option<&str>, salt: &[u8]) -> VaultResult<Zeroizing<[u8; KEY_LEN]>> {
        if let Some(password) = password {
            return self.derive_key(password, salt);
        }

        let guard = self.master.read().unwrap_or_else(|e| e.into_inner());
        let master = guard
            .as_ref()
            .ok_or(VaultError::Crypto(CryptoFailure::NoKeyMaterial))?;
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        Hkdf::<Sha256>::new(Some(salt), &master.key[..])
            .expand(MASTER_KEY_INFO, &mut out[..])
            .map_err(|_| VaultError::Crypto(CryptoFailure::KeyDerivation))?;
        Ok(out)
    }
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}
