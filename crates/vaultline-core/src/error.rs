use thiserror::Error;

/// Convenience alias used across the Vaultline crates.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors produced by the crypto engine, record store and the managers layered on it.
///
/// `NotFound` is reserved for lookups the caller asked to be strict about; plain
/// reads of an absent record return `Ok(None)` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// Input has the wrong shape (empty key, malformed import, empty plaintext).
    #[error("validation failed: {0}")]
    Validation(String),
    /// Integrity hash or backup checksum did not match.
    #[error("integrity check failed for {key}")]
    Integrity { key: String },
    /// Encryption, decryption or key handling failed. The message is fixed per
    /// failure class and never carries the underlying cause.
    #[error("crypto error: {0}")]
    Crypto(CryptoFailure),
    /// Requested record, session, backup or provider does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Settings failed validation beyond recoverable warnings.
    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),
    /// Settings were accessed before `load_settings`.
    #[error("settings not loaded")]
    NotLoaded,
    /// Underlying storage medium failure (I/O, permissions, lock poisoning).
    #[error("storage failure: {reason}")]
    Storage { reason: String },
    /// Stored bytes could not be parsed, or a value could not be serialized.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

/// Coarse crypto failure classes. Every decryption problem collapses into
/// `DecryptionFailed` so callers cannot distinguish a wrong key from tampering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoFailure {
    DecryptionFailed,
    EncryptionFailed,
    NoKeyMaterial,
    InvalidKeyLength,
    KeyDerivation,
}

impl std::fmt::Display for CryptoFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::DecryptionFailed => "decryption failed",
            Self::EncryptionFailed => "encryption failed",
            Self::NoKeyMaterial => "no key material available",
            Self::InvalidKeyLength => "invalid key length",
            Self::KeyDerivation => "key derivation failed",
        };
        f.write_str(msg)
    }
}

impl VaultError {
    pub fn storage<E: ToString>(err: E) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }

    pub fn serialization<E: ToString>(err: E) -> Self {
        Self::Serialization(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}
