//! Concrete storage implementations with encryption at rest.
//! AES-256-GCM with Argon2id password keys or an HKDF-expanded master key; records
//! carry SHA-256 integrity hashes over their plaintext and keep rotating backups.

pub mod crypto;
pub mod file_medium;
pub mod key_provider;
pub mod record_store;

pub use crypto::{CryptoEngine, EncryptedPayload, KdfParams};
pub use record_store::{RecordStore, RecordStoreConfig};
