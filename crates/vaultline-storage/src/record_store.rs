use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use vaultline_core::{
    clock::{Clock, SystemClock},
    error::{VaultError, VaultResult},
    locks::KeyLocks,
    medium::StorageMedium,
};
use zeroize::Zeroizing;

use crate::crypto::{CryptoEngine, EncryptedPayload};

const RECORD_PREFIX: &str = "record/";
const BACKUP_PREFIX: &str = "backup/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordStoreConfig {
    /// Encrypt record payloads through the crypto engine.
    pub encryption_enabled: bool,
    /// Backups kept per key; the oldest are evicted first.
    pub max_backups: usize,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            max_backups: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// SHA-256 of the canonical plaintext JSON, taken before encryption.
    pub integrity_hash: String,
    pub encrypted: bool,
}

/// Metadata fields callers may overwrite. `updated_at` is always bumped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPatch {
    pub version: Option<u64>,
    pub integrity_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_keys: usize,
    /// Bytes occupied by live records, backups excluded.
    pub total_size: u64,
    pub encrypted_keys: usize,
    pub last_backup: Option<DateTime<Utc>>,
}

/// On-medium layout of a record. `data` is the plaintext JSON value or, when
/// `metadata.encrypted` is set, a serialized `EncryptedPayload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    data: serde_json::Value,
    metadata: RecordMetadata,
}

/// Versioned, integrity-checked, optionally encrypted JSON records with rotating backups.
pub struct RecordStore<M: StorageMedium> {
    medium: M,
    crypto: Arc<CryptoEngine>,
    config: RecordStoreConfig,
    locks: KeyLocks,
    clock: Arc<dyn Clock>,
}

impl<M: StorageMedium> RecordStore<M> {
    pub fn new(medium: M, crypto: Arc<CryptoEngine>, config: RecordStoreConfig) -> Self {
        Self {
            medium,
            crypto,
            config,
            locks: KeyLocks::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn crypto(&self) -> &Arc<CryptoEngine> {
        &self.crypto
    }

    pub fn config(&self) -> RecordStoreConfig {
        self.config
    }

    /// Serialize, hash, optionally encrypt and write `data` under `key`. An existing
    /// record is copied to a backup first; the live write only happens once that
    /// copy is committed.
    #[instrument(skip(self, data, password))]
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        password: Option<&str>,
    ) -> VaultResult<()> {
        validate_key(key)?;
        let value = serde_json::to_value(data)?;
        let plaintext = Zeroizing::new(serde_json::to_vec(&value)?);
        let integrity_hash = CryptoEngine::generate_hash(plaintext.as_slice());

        let _guard = self.locks.lock(key).await;
        let now = self.clock.now();
        let mut metadata = RecordMetadata {
            version: 1,
            created_at: now,
            updated_at: now,
            integrity_hash,
            encrypted: self.config.encryption_enabled,
        };

        if let Some(previous) = self.read_raw(&record_key(key)).await? {
            match serde_json::from_slice::<Envelope>(&previous) {
                Ok(prev) => {
                    metadata.version = prev.metadata.version + 1;
                    metadata.created_at = prev.metadata.created_at;
                }
                Err(err) => warn!(%err, "existing record unreadable; backing up raw bytes"),
            }
            self.write_backup(key, &previous, now).await?;
        }

        let data = if self.config.encryption_enabled {
            let payload = self
                .crypto
                .encrypt_offloaded(plaintext, password.map(|p| Zeroizing::new(p.to_string())))
                .await?;
            serde_json::to_value(payload)?
        } else {
            // Persist the value that was hashed; `open` re-serializes this same value.
            value
        };

        let bytes = serde_json::to_vec(&Envelope { data, metadata })?;
        self.medium.put(&record_key(key), &bytes).await?;
        debug!(size = bytes.len(), "record stored");
        Ok(())
    }

    /// Read, decrypt and verify the record under `key`. `Ok(None)` when absent.
    #[instrument(skip(self, password))]
    pub async fn retrieve<T: DeserializeOwned>(
        &self,
        key: &str,
        password: Option<&str>,
    ) -> VaultResult<Option<T>> {
        let Some(bytes) = self.read_raw(&record_key(key)).await? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        let value = self.open(key, envelope, password).await?;
        Ok(Some(serde_json::from_value(value)?))
    }

    pub async fn exists(&self, key: &str) -> VaultResult<bool> {
        Ok(self.read_raw(&record_key(key)).await?.is_some())
    }

    /// Remove the live record. Backups stay until `cleanup`.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> VaultResult<()> {
        let _guard = self.locks.lock(key).await;
        self.medium.delete(&record_key(key)).await
    }

    /// Remove the live record together with every backup of it, so nothing is left
    /// to restore. Returns how many backups went with it.
    #[instrument(skip(self))]
    pub async fn purge(&self, key: &str) -> VaultResult<usize> {
        let _guard = self.locks.lock(key).await;
        let stamps = self.backup_stamps(key).await?;
        for stamp in &stamps {
            self.medium.delete(&backup_key(key, *stamp)).await?;
        }
        self.medium.delete(&record_key(key)).await?;
        debug!(backups = stamps.len(), "record purged");
        Ok(stamps.len())
    }

    pub async fn list_keys(&self) -> VaultResult<Vec<String>> {
        Ok(self
            .medium
            .list(RECORD_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(RECORD_PREFIX).map(str::to_string))
            .collect())
    }

    pub async fn get_metadata(&self, key: &str) -> VaultResult<Option<RecordMetadata>> {
        let Some(bytes) = self.read_raw(&record_key(key)).await? else {
            return Ok(None);
        };
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        Ok(Some(envelope.metadata))
    }

    /// Overwrite metadata without touching the payload.
    #[instrument(skip(self, patch))]
    pub async fn update_metadata(
        &self,
        key: &str,
        patch: MetadataPatch,
    ) -> VaultResult<RecordMetadata> {
        let _guard = self.locks.lock(key).await;
        let bytes = self
            .read_raw(&record_key(key))
            .await?
            .ok_or_else(|| VaultError::NotFound(key.to_string()))?;
        let mut envelope: Envelope = serde_json::from_slice(&bytes)?;

        if let Some(version) = patch.version {
            envelope.metadata.version = version;
        }
        if let Some(hash) = patch.integrity_hash {
            envelope.metadata.integrity_hash = hash;
        }
        envelope.metadata.updated_at = self.clock.now();

        self.medium
            .put(&record_key(key), &serde_json::to_vec(&envelope)?)
            .await?;
        Ok(envelope.metadata)
    }

    /// Backup timestamps for `key`, newest first.
    pub async fn list_backups(&self, key: &str) -> VaultResult<Vec<DateTime<Utc>>> {
        let stamps = self.backup_stamps(key).await?;
        Ok(stamps
            .into_iter()
            .rev()
            .filter_map(DateTime::from_timestamp_millis)
            .collect())
    }

    /// Verify the backup taken at `timestamp` and copy it over the live record. The
    /// current live record is itself backed up first.
    #[instrument(skip(self, password))]
    pub async fn restore_from_backup(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
        password: Option<&str>,
    ) -> VaultResult<()> {
        let _guard = self.locks.lock(key).await;
        let backup = self
            .read_raw(&backup_key(key, timestamp.timestamp_millis()))
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("backup {key}@{timestamp}")))?;

        let envelope: Envelope = serde_json::from_slice(&backup)?;
        self.open(key, envelope, password).await?;

        if let Some(live) = self.read_raw(&record_key(key)).await? {
            self.write_backup(key, &live, self.clock.now()).await?;
        }
        self.medium.put(&record_key(key), &backup).await?;
        debug!("record restored from backup");
        Ok(())
    }

    pub async fn get_stats(&self) -> VaultResult<StoreStats> {
        let mut stats = StoreStats::default();
        for key in self.medium.list(RECORD_PREFIX).await? {
            let Some(bytes) = self.read_raw(&key).await? else {
                continue;
            };
            stats.total_keys += 1;
            stats.total_size += bytes.len() as u64;
            match serde_json::from_slice::<Envelope>(&bytes) {
                Ok(env) if env.metadata.encrypted => stats.encrypted_keys += 1,
                Ok(_) => {}
                Err(err) => warn!(%err, key, "unreadable record skipped in stats"),
            }
        }

        stats.last_backup = self
            .medium
            .list(BACKUP_PREFIX)
            .await?
            .iter()
            .filter_map(|k| k.rsplit('/').next()?.parse::<i64>().ok())
            .max()
            .and_then(DateTime::from_timestamp_millis);
        Ok(stats)
    }

    /// Delete every record and every backup. Returns how many entries were removed.
    #[instrument(skip(self))]
    pub async fn cleanup(&self) -> VaultResult<usize> {
        let mut removed = 0;
        for prefix in [RECORD_PREFIX, BACKUP_PREFIX] {
            for key in self.medium.list(prefix).await? {
                self.medium.delete(&key).await?;
                removed += 1;
            }
        }
        debug!(removed, "store wiped");
        Ok(removed)
    }

    async fn open(
        &self,
        key: &str,
        envelope: Envelope,
        password: Option<&str>,
    ) -> VaultResult<serde_json::Value> {
        let plaintext = if envelope.metadata.encrypted {
            let payload: EncryptedPayload = serde_json::from_value(envelope.data)?;
            self.crypto
                .decrypt_offloaded(payload, password.map(|p| Zeroizing::new(p.to_string())))
                .await?
        } else {
            Zeroizing::new(serde_json::to_vec(&envelope.data)?)
        };

        if !CryptoEngine::verify_hash(plaintext.as_slice(), &envelope.metadata.integrity_hash) {
            warn!(key, "integrity hash mismatch");
            return Err(VaultError::Integrity {
                key: key.to_string(),
            });
        }
        Ok(serde_json::from_slice(&plaintext)?)
    }

    async fn read_raw(&self, medium_key: &str) -> VaultResult<Option<Vec<u8>>> {
        match self.medium.get(medium_key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(VaultError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write_backup(&self, key: &str, bytes: &[u8], now: DateTime<Utc>) -> VaultResult<()> {
        let mut stamps = self.backup_stamps(key).await?;
        let mut stamp = now.timestamp_millis();
        // Two stores inside the same millisecond still get distinct backups.
        if let Some(&last) = stamps.last() {
            stamp = stamp.max(last + 1);
        }
        self.medium.put(&backup_key(key, stamp), bytes).await?;
        stamps.push(stamp);

        let excess = stamps.len().saturating_sub(self.config.max_backups);
        for old in &stamps[..excess] {
            self.medium.delete(&backup_key(key, *old)).await?;
        }
        if excess > 0 {
            debug!(evicted = excess, "old backups evicted");
        }
        Ok(())
    }

    /// Backup stamps for `key`, ascending.
    async fn backup_stamps(&self, key: &str) -> VaultResult<Vec<i64>> {
        let prefix = format!("{BACKUP_PREFIX}{key}/");
        let mut stamps: Vec<i64> = self
            .medium
            .list(&prefix)
            .await?
            .iter()
            // "backup/a/b/…" also starts with "backup/a/"; the digit parse rejects it.
            .filter_map(|k| k.strip_prefix(&prefix)?.parse().ok())
            .collect();
        stamps.sort_unstable();
        Ok(stamps)
    }
}

fn record_key(key: &str) -> String {
    format!("{RECORD_PREFIX}{key}")
}

fn backup_key(key: &str, stamp: i64) -> String {
    format!("{BACKUP_PREFIX}{key}/{stamp:020}")
}

fn validate_key(key: &str) -> VaultResult<()> {
    if key.trim().is_empty() {
        return Err(VaultError::Validation("record key must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;
    use vaultline_core::{
        clock::ManualClock,
        error::CryptoFailure,
        medium::InMemoryMedium,
    };

    use super::*;
    use crate::crypto::KdfParams;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        limits: std::collections::BTreeMap<String, u32>,
    }

    fn profile() -> Profile {
        Profile {
            name: "operator".into(),
            tags: vec!["a".into(), "b".into()],
            limits: [("rpm".to_string(), 60)].into_iter().collect(),
        }
    }

    fn keyed_engine() -> Arc<CryptoEngine> {
        let engine = CryptoEngine::new(KdfParams::minimal());
        engine.set_key(&CryptoEngine::generate_random_key()).expect("key");
        Arc::new(engine)
    }

    fn store_with(config: RecordStoreConfig) -> (RecordStore<InMemoryMedium>, InMemoryMedium) {
        let medium = InMemoryMedium::new();
        (
            RecordStore::new(medium.clone(), keyed_engine(), config),
            medium,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn encrypted_round_trip_hides_plaintext() {
        let (store, medium) = store_with(RecordStoreConfig::default());
        store.store("profile", &profile(), None).await.expect("store");

        let loaded: Profile = store.retrieve("profile", None).await.expect("retrieve").expect("present");
        assert_eq!(loaded, profile());

        let raw = String::from_utf8(medium.get("record/profile").await.expect("raw")).expect("utf8");
        assert!(!raw.contains("operator"), "plaintext must not be stored");
        let meta = store.get_metadata("profile").await.expect("meta").expect("present");
        assert!(meta.encrypted);
        assert_eq!(meta.version, 1);
    }

    #[tokio::test]
    async fn plaintext_mode_round_trip() {
        let (store, medium) = store_with(RecordStoreConfig {
            encryption_enabled: false,
            max_backups: 2,
        });
        store.store("k", &json!({"a": 1, "b": [1.5, "x"]}), None).await.expect("store");

        let loaded: serde_json::Value = store.retrieve("k", None).await.expect("retrieve").expect("present");
        assert_eq!(loaded, json!({"a": 1, "b": [1.5, "x"]}));

        let raw = String::from_utf8(medium.get("record/k").await.expect("raw")).expect("utf8");
        assert!(raw.contains("\"encrypted\":false"));
    }

    #[tokio::test]
    async fn missing_key_is_none_not_error() {
        let (store, _) = store_with(RecordStoreConfig::default());
        let loaded: Option<Profile> = store.retrieve("nope", None).await.expect("retrieve");
        assert!(loaded.is_none());
        assert!(!store.exists("nope").await.expect("exists"));
        assert!(store.get_metadata("nope").await.expect("meta").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupted_integrity_hash_is_an_integrity_error() {
        let (store, _) = store_with(RecordStoreConfig::default());
        store.store("k", &profile(), None).await.expect("store");
        store
            .update_metadata(
                "k",
                MetadataPatch {
                    integrity_hash: Some("0".repeat(64)),
                    ..Default::default()
                },
            )
            .await
            .expect("patch");

        let err = store.retrieve::<Profile>("k", None).await.expect_err("tampered");
        assert_eq!(err, VaultError::Integrity { key: "k".into() });
    }

    #[tokio::test]
    async fn corrupted_json_is_a_parse_error() {
        let (store, medium) = store_with(RecordStoreConfig::default());
        medium.put("record/k", b"{not json").await.expect("put");
        let err = store.retrieve::<Profile>("k", None).await.expect_err("corrupt");
        assert!(matches!(err, VaultError::Serialization(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn password_protected_record_needs_the_password() {
        let (store, _) = store_with(RecordStoreConfig::default());
        store.store("k", &json!({"a": 1}), Some("pw")).await.expect("store");

        let ok: serde_json::Value = store.retrieve("k", Some("pw")).await.expect("right pw").expect("present");
        assert_eq!(ok, json!({"a": 1}));

        let err = store.retrieve::<serde_json::Value>("k", Some("other")).await.expect_err("wrong pw");
        assert_eq!(err, VaultError::Crypto(CryptoFailure::DecryptionFailed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backups_are_capped_and_newest_first() {
        let (store, _) = store_with(RecordStoreConfig {
            encryption_enabled: true,
            max_backups: 3,
        });
        for i in 0..7 {
            store.store("k", &json!({ "i": i }), None).await.expect("store");
        }

        let backups = store.list_backups("k").await.expect("list");
        assert_eq!(backups.len(), 3);
        assert!(backups.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(store.get_metadata("k").await.unwrap().unwrap().version, 7);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restore_copies_backup_over_live_record() {
        let (store, _) = store_with(RecordStoreConfig::default());
        store.store("k", &json!({"v": 1}), None).await.expect("v1");
        store.store("k", &json!({"v": 2}), None).await.expect("v2");

        let oldest = *store.list_backups("k").await.expect("list").last().expect("one backup");
        store.restore_from_backup("k", oldest, None).await.expect("restore");

        let restored: serde_json::Value = store.retrieve("k", None).await.unwrap().unwrap();
        assert_eq!(restored, json!({"v": 1}));
        // the overwritten v2 is itself kept as a backup
        assert_eq!(store.list_backups("k").await.unwrap().len(), 2);

        let missing = DateTime::from_timestamp_millis(1).expect("ts");
        let err = store.restore_from_backup("k", missing, None).await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn nested_keys_do_not_share_backups() {
        let (store, _) = store_with(RecordStoreConfig {
            encryption_enabled: false,
            max_backups: 5,
        });
        store.store("a", &1, None).await.unwrap();
        store.store("a", &2, None).await.unwrap();
        store.store("a/b", &1, None).await.unwrap();
        store.store("a/b", &2, None).await.unwrap();
        store.store("a/b", &3, None).await.unwrap();

        assert_eq!(store.list_backups("a").await.unwrap().len(), 1);
        assert_eq!(store.list_backups("a/b").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_list_and_cleanup() {
        let (store, medium) = store_with(RecordStoreConfig {
            encryption_enabled: false,
            max_backups: 5,
        });
        store.store("a", &1, None).await.unwrap();
        store.store("a", &2, None).await.unwrap();
        store.store("b", &1, None).await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec!["a", "b"]);

        store.delete("b").await.expect("delete");
        store.delete("b").await.expect("delete again");
        assert_eq!(store.list_keys().await.unwrap(), vec!["a"]);

        let removed = store.cleanup().await.expect("cleanup");
        assert_eq!(removed, 2);
        assert!(medium.list("").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_leaves_nothing_to_restore() {
        let (store, medium) = store_with(RecordStoreConfig::default());
        for n in 0..4 {
            store.store("a", &n, None).await.unwrap();
        }
        store.store("a/b", &1, None).await.unwrap();
        store.store("a/b", &2, None).await.unwrap();
        let stamps = store.list_backups("a").await.unwrap();
        assert_eq!(stamps.len(), 3);

        assert_eq!(store.purge("a").await.expect("purge"), 3);
        assert!(!store.exists("a").await.unwrap());
        assert!(store.list_backups("a").await.unwrap().is_empty());
        let err = store.restore_from_backup("a", stamps[0], None).await.expect_err("gone");
        assert!(matches!(err, VaultError::NotFound(_)));

        // A nested key keeps its own record and backups.
        assert!(store.exists("a/b").await.unwrap());
        assert_eq!(store.list_backups("a/b").await.unwrap().len(), 1);
        assert_eq!(
            medium.list("backup/a/").await.unwrap().len(),
            1,
            "only the nested key's backup remains"
        );

        assert_eq!(store.purge("missing").await.expect("purge missing"), 0);
    }

    #[tokio::test]
    async fn plaintext_mode_keeps_arbitrary_floats_intact() {
        let (store, _) = store_with(RecordStoreConfig {
            encryption_enabled: false,
            max_backups: 1,
        });
        // Deterministic spread over the whole f64 bit space.
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut floats = Vec::new();
        while floats.len() < 5_000 {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let f = f64::from_bits(state);
            if f.is_finite() {
                floats.push(f);
            }
        }
        floats.extend([0.1, 1.8597941207808163e-7, f64::MIN_POSITIVE, f64::MAX, -0.0]);

        for chunk in floats.chunks(250) {
            store.store("floats", chunk, None).await.expect("store");
            let loaded: Vec<f64> = store
                .retrieve("floats", None)
                .await
                .expect("integrity holds")
                .expect("present");
            let same = loaded.iter().zip(chunk).all(|(a, b)| a.to_bits() == b.to_bits());
            assert!(same && loaded.len() == chunk.len(), "floats changed on the way back");
        }
    }

    #[tokio::test]
    async fn update_metadata_bumps_updated_at_only() {
        let clock = Arc::new(ManualClock::default());
        let medium = InMemoryMedium::new();
        let store = RecordStore::new(
            medium,
            keyed_engine(),
            RecordStoreConfig {
                encryption_enabled: false,
                max_backups: 1,
            },
        )
        .with_clock(clock.clone());

        store.store("k", &json!({"x": true}), None).await.unwrap();
        let before = store.get_metadata("k").await.unwrap().unwrap();
        clock.advance(Duration::minutes(3));

        let after = store
            .update_metadata("k", MetadataPatch { version: Some(9), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(after.version, 9);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.updated_at, before.updated_at + Duration::minutes(3));
        let value: serde_json::Value = store.retrieve("k", None).await.unwrap().unwrap();
        assert_eq!(value, json!({"x": true}));

        let err = store.update_metadata("missing", MetadataPatch::default()).await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stats_count_keys_and_encryption() {
        let (store, _) = store_with(RecordStoreConfig::default());
        assert_eq!(store.get_stats().await.unwrap(), StoreStats::default());

        store.store("a", &1, None).await.unwrap();
        store.store("a", &2, None).await.unwrap();
        store.store("b", &1, None).await.unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.encrypted_keys, 2);
        assert!(stats.total_size > 0);
        assert!(stats.last_backup.is_some());
    }

    #[tokio::test]
    async fn empty_key_is_rejected() {
        let (store, _) = store_with(RecordStoreConfig::default());
        let err = store.store("  ", &1, None).await.expect_err("empty key");
        assert!(matches!(err, VaultError::Validation(_)));
    }
}
