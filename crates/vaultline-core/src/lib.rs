//! Core abstractions for Vaultline: the error taxonomy, the storage medium contract,
//! and the small seams (clock, per-key locks, credential tester) shared by the
//! record store, session manager and settings manager.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod clock;
pub mod error;
pub mod locks;
pub mod medium;
pub mod connectivity;

pub use error::{VaultError, VaultResult};
