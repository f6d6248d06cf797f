use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use vaultline_core::{
    clock::{Clock, SystemClock},
    error::{CryptoFailure, VaultError},
    medium::StorageMedium,
    connectivity::{CredentialTester, ConnectivityOutcome, ConnectivityRequest},
    VaultResult,
};
use vaultline_storage::{CryptoEngine, EncryptedPayload, RecordStore};
use zeroize::Zeroizing;

use crate::{
    model::{
        upgrade, PreferencesPatch, ProviderConfig, SecureSettings, SecurityPatch, SettingsBackup,
        StoredSettings, ToolServerConfig, REDACTED, SETTINGS_SCHEMA_VERSION,
    },
    validate::{validate_settings, ValidationReport},
};

/// Record key holding the settings aggregate.
pub const SETTINGS_KEY: &str = "settings/secure";
const BACKUP_PREFIX: &str = "settings-backup/";
const MASK_VISIBLE: usize = 4;
const MIN_KEY_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Settings snapshots kept; the oldest are pruned after each new one.
    pub max_backups: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self { max_backups: 10 }
    }
}

/// Result of the local credential format check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyCheck {
    pub valid: bool,
    pub error: Option<String>,
}

impl ApiKeyCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(reason.into()),
        }
    }
}

/// Owns the in-memory settings aggregate. Every mutation validates the candidate,
/// writes it through the record store and only then replaces the cached copy, so a
/// failed save leaves the previous state in place.
pub struct SettingsManager<M: StorageMedium> {
    store: Arc<RecordStore<M>>,
    crypto: Arc<CryptoEngine>,
    config: SettingsConfig,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<SecureSettings>>,
}

impl<M: StorageMedium> SettingsManager<M> {
    pub fn new(store: Arc<RecordStore<M>>, config: SettingsConfig) -> Self {
        let crypto = Arc::clone(store.crypto());
        Self {
            store,
            crypto,
            config,
            clock: Arc::new(SystemClock),
            current: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn is_loaded(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Read, upgrade, decrypt and validate the stored settings. Anything short of a
    /// valid document falls back to the defaults, which are persisted right away.
    #[instrument(skip(self))]
    pub async fn load_settings(&self) -> VaultResult<SecureSettings> {
        let mut current = self.current.lock().await;

        let loaded = match self.read_stored().await {
            Ok(Some(settings)) => {
                let report = validate_settings(&settings);
                for warning in &report.warnings {
                    warn!(%warning, "settings warning");
                }
                if report.valid {
                    Some(settings)
                } else {
                    warn!(errors = ?report.errors, "stored settings invalid; using defaults");
                    None
                }
            }
            Ok(None) => {
                info!("no stored settings; writing defaults");
                None
            }
            Err(err) => {
                warn!(%err, "stored settings unreadable; using defaults");
                None
            }
        };

        let settings = match loaded {
            Some(settings) => settings,
            None => self.save(&SecureSettings::defaults(self.clock.now())).await?,
        };
        *current = Some(settings.clone());
        Ok(settings)
    }

    /// Persist `settings`, or the cached aggregate when `None`.
    #[instrument(skip_all)]
    pub async fn save_settings(&self, settings: Option<SecureSettings>) -> VaultResult<()> {
        let mut current = self.current.lock().await;
        let target = match settings {
            Some(settings) => {
                let report = validate_settings(&settings);
                if !report.valid {
                    return Err(VaultError::Config(report.errors));
                }
                settings
            }
            None => current.clone().ok_or(VaultError::NotLoaded)?,
        };
        let saved = self.save(&target).await?;
        *current = Some(saved);
        Ok(())
    }

    pub async fn get_settings(&self) -> VaultResult<SecureSettings> {
        self.current.lock().await.clone().ok_or(VaultError::NotLoaded)
    }

    /// Insert or replace the provider with the same id.
    pub async fn update_llm_provider(&self, provider: ProviderConfig) -> VaultResult<()> {
        self.mutate(|settings| {
            match settings.providers.iter_mut().find(|p| p.id == provider.id) {
                Some(existing) => *existing = provider,
                None => settings.providers.push(provider),
            }
            Ok(())
        })
        .await
    }

    /// Returns whether a provider with `id` existed.
    pub async fn remove_llm_provider(&self, id: &str) -> VaultResult<bool> {
        let mut removed = false;
        self.mutate(|settings| {
            let before = settings.providers.len();
            settings.providers.retain(|p| p.id != id);
            removed = settings.providers.len() != before;
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    pub async fn update_mcp_server(&self, server: ToolServerConfig) -> VaultResult<()> {
        self.mutate(|settings| {
            match settings.tool_servers.iter_mut().find(|s| s.id == server.id) {
                Some(existing) => *existing = server,
                None => settings.tool_servers.push(server),
            }
            Ok(())
        })
        .await
    }

    pub async fn remove_mcp_server(&self, id: &str) -> VaultResult<bool> {
        let mut removed = false;
        self.mutate(|settings| {
            let before = settings.tool_servers.len();
            settings.tool_servers.retain(|s| s.id != id);
            removed = settings.tool_servers.len() != before;
            Ok(())
        })
        .await?;
        Ok(removed)
    }

    pub async fn update_preferences(&self, patch: PreferencesPatch) -> VaultResult<()> {
        self.mutate(|settings| {
            patch.apply(&mut settings.preferences);
            Ok(())
        })
        .await
    }

    pub async fn update_security_settings(&self, patch: SecurityPatch) -> VaultResult<()> {
        self.mutate(|settings| {
            patch.apply(&mut settings.security_policy);
            Ok(())
        })
        .await
    }

    pub fn validate_settings(&self, settings: &SecureSettings) -> ValidationReport {
        validate_settings(settings)
    }

    /// Snapshot the current aggregate under a timestamped record.
    #[instrument(skip(self))]
    pub async fn create_backup(&self) -> VaultResult<SettingsBackup> {
        let current = self.current.lock().await;
        let settings = current.as_ref().ok_or(VaultError::NotLoaded)?;
        self.snapshot(settings).await
    }

    /// Backup timestamps, newest first.
    pub async fn list_backups(&self) -> VaultResult<Vec<DateTime<Utc>>> {
        let mut stamps = self.backup_stamps().await?;
        stamps.reverse();
        Ok(stamps
            .into_iter()
            .filter_map(DateTime::from_timestamp_millis)
            .collect())
    }

    pub async fn load_backup(&self, timestamp: DateTime<Utc>) -> VaultResult<SettingsBackup> {
        let key = backup_key(timestamp.timestamp_millis());
        let stored: SettingsBackup<Option<EncryptedPayload>> = self
            .store
            .retrieve(&key, None)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("settings backup {timestamp}")))?;

        Ok(SettingsBackup {
            settings: self.decrypt_credentials(stored.settings).await?,
            timestamp: stored.timestamp,
            version: stored.version,
            checksum: stored.checksum,
        })
    }

    /// Verify `backup` and make it the current aggregate. Nothing changes unless the
    /// checksum matches and the settings validate; the replaced state is snapshotted.
    #[instrument(skip_all, fields(timestamp = %backup.timestamp))]
    pub async fn restore_from_backup(&self, backup: SettingsBackup) -> VaultResult<()> {
        if checksum(&backup.settings)? != backup.checksum {
            return Err(VaultError::Integrity {
                key: format!("settings backup {}", backup.timestamp),
            });
        }
        let report = validate_settings(&backup.settings);
        if !report.valid {
            return Err(VaultError::Config(report.errors));
        }

        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            self.snapshot(existing).await?;
        }
        let saved = self.save(&backup.settings).await?;
        *current = Some(saved);
        info!("settings restored from backup");
        Ok(())
    }

    /// Pretty JSON of the current aggregate. Credentials are redacted unless
    /// `include_sensitive` is set.
    pub async fn export_settings(&self, include_sensitive: bool) -> VaultResult<String> {
        let current = self.current.lock().await;
        let settings = current.as_ref().ok_or(VaultError::NotLoaded)?;
        let json = if include_sensitive {
            warn!("exporting settings with plaintext credentials");
            serde_json::to_string_pretty(settings)?
        } else {
            serde_json::to_string_pretty(&settings.redacted())?
        };
        Ok(json)
    }

    /// Replace the aggregate with an imported document. Providers whose key is the
    /// redaction marker keep the key currently stored for the same id.
    #[instrument(skip_all)]
    pub async fn import_settings(&self, json: &str) -> VaultResult<ValidationReport> {
        let doc: Value = serde_json::from_str(json)
            .map_err(|e| VaultError::Validation(format!("malformed settings document: {e}")))?;
        let mut imported: SecureSettings = serde_json::from_value(upgrade(doc))
            .map_err(|e| VaultError::Validation(format!("malformed settings document: {e}")))?;

        let mut current = self.current.lock().await;
        for provider in &mut imported.providers {
            if provider.api_key == REDACTED {
                provider.api_key = current
                    .as_ref()
                    .and_then(|s| s.provider(&provider.id))
                    .map(|p| p.api_key.clone())
                    .unwrap_or_default();
            }
        }

        let report = validate_settings(&imported);
        if !report.valid {
            return Err(VaultError::Validation(report.errors.join("; ")));
        }

        if let Some(existing) = current.as_ref() {
            self.snapshot(existing).await?;
        }
        let saved = self.save(&imported).await?;
        *current = Some(saved);
        info!(providers = imported.providers.len(), "settings imported");
        Ok(report)
    }

    pub async fn get_masked_api_key(&self, provider_id: &str) -> VaultResult<String> {
        let current = self.current.lock().await;
        let settings = current.as_ref().ok_or(VaultError::NotLoaded)?;
        let provider = settings
            .provider(provider_id)
            .ok_or_else(|| VaultError::NotFound(format!("provider {provider_id}")))?;
        Ok(mask_api_key(&provider.api_key))
    }

    /// Local format check of the stored credential. No network.
    pub async fn test_api_key(&self, provider_id: &str) -> VaultResult<ApiKeyCheck> {
        let provider = self.provider(provider_id).await?;
        Ok(check_api_key(&provider.kind, &provider.api_key))
    }

    /// Format check, then hand the credential to `tester`. Connection failures are reported
    /// in the outcome rather than as errors.
    #[instrument(skip(self, tester), fields(tester = tester.name()))]
    pub async fn check_connectivity(
        &self,
        provider_id: &str,
        tester: &dyn CredentialTester,
    ) -> VaultResult<ConnectivityOutcome> {
        let provider = self.provider(provider_id).await?;
        let check = check_api_key(&provider.kind, &provider.api_key);
        if !check.valid {
            return Ok(ConnectivityOutcome {
                success: false,
                models: None,
                error: check.error,
            });
        }

        let request = ConnectivityRequest {
            provider: provider.kind.clone(),
            api_key: provider.api_key.clone(),
            base_url: provider.base_url.clone(),
        };
        match tester.test_connection(request).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                debug!(%err, "credential connectivity check failed");
                Ok(ConnectivityOutcome {
                    success: false,
                    models: None,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// Snapshot whatever is loaded, then persist and adopt the defaults.
    #[instrument(skip(self))]
    pub async fn reset_to_defaults(&self) -> VaultResult<()> {
        let mut current = self.current.lock().await;
        if let Some(existing) = current.as_ref() {
            self.snapshot(existing).await?;
        }
        let saved = self.save(&SecureSettings::defaults(self.clock.now())).await?;
        *current = Some(saved);
        info!("settings reset to defaults");
        Ok(())
    }

    /// Zero the cached credentials and forget the aggregate.
    pub async fn cleanup(&self) {
        if let Some(mut settings) = self.current.lock().await.take() {
            settings.wipe_credentials();
            debug!("settings cache wiped");
        }
    }

    async fn provider(&self, provider_id: &str) -> VaultResult<ProviderConfig> {
        let current = self.current.lock().await;
        let settings = current.as_ref().ok_or(VaultError::NotLoaded)?;
        settings
            .provider(provider_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("provider {provider_id}")))
    }

    async fn mutate<F>(&self, apply: F) -> VaultResult<()>
    where
        F: FnOnce(&mut SecureSettings) -> VaultResult<()>,
    {
        let mut current = self.current.lock().await;
        let mut next = current.clone().ok_or(VaultError::NotLoaded)?;
        apply(&mut next)?;

        let report = validate_settings(&next);
        if !report.valid {
            return Err(VaultError::Config(report.errors));
        }
        let saved = self.save(&next).await?;
        *current = Some(saved);
        Ok(())
    }

    /// Encrypt credentials into a copy, stamp it and write it. Returns the stamped
    /// plaintext aggregate; `settings` itself is left untouched.
    async fn save(&self, settings: &SecureSettings) -> VaultResult<SecureSettings> {
        let mut stamped = settings.clone();
        stamped.last_updated = self.clock.now();
        stamped.version = SETTINGS_SCHEMA_VERSION;

        let stored = self.encrypt_credentials(&stamped).await?;
        self.store.store(SETTINGS_KEY, &stored, None).await?;
        debug!(providers = stamped.providers.len(), "settings saved");
        Ok(stamped)
    }

    async fn read_stored(&self) -> VaultResult<Option<SecureSettings>> {
        let Some(doc) = self.store.retrieve::<Value>(SETTINGS_KEY, None).await? else {
            return Ok(None);
        };
        let stored: StoredSettings = serde_json::from_value(upgrade(doc))?;
        self.decrypt_credentials(stored).await.map(Some)
    }

    async fn snapshot(&self, settings: &SecureSettings) -> VaultResult<SettingsBackup> {
        let checksum = checksum(settings)?;
        let stored = self.encrypt_credentials(settings).await?;

        let mut millis = self.clock.now().timestamp_millis();
        if let Some(last) = self.backup_stamps().await?.last() {
            millis = millis.max(last + 1);
        }
        let timestamp = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| VaultError::storage("backup timestamp out of range"))?;

        let record = SettingsBackup {
            settings: stored,
            timestamp,
            version: SETTINGS_SCHEMA_VERSION,
            checksum: checksum.clone(),
        };
        self.store.store(&backup_key(millis), &record, None).await?;
        self.prune_backups().await?;
        debug!(%timestamp, "settings snapshot written");

        Ok(SettingsBackup {
            settings: settings.clone(),
            timestamp,
            version: SETTINGS_SCHEMA_VERSION,
            checksum,
        })
    }

    async fn prune_backups(&self) -> VaultResult<()> {
        let stamps = self.backup_stamps().await?;
        let excess = stamps.len().saturating_sub(self.config.max_backups);
        for millis in &stamps[..excess] {
            self.store.delete(&backup_key(*millis)).await?;
        }
        if excess > 0 {
            debug!(pruned = excess, "old settings snapshots pruned");
        }
        Ok(())
    }

    /// Snapshot timestamps in millis, oldest first.
    async fn backup_stamps(&self) -> VaultResult<Vec<i64>> {
        let mut stamps: Vec<i64> = self
            .store
            .list_keys()
            .await?
            .iter()
            .filter_map(|k| k.strip_prefix(BACKUP_PREFIX)?.parse().ok())
            .collect();
        stamps.sort_unstable();
        Ok(stamps)
    }

    async fn encrypt_credentials(&self, settings: &SecureSettings) -> VaultResult<StoredSettings> {
        let mut providers = Vec::with_capacity(settings.providers.len());
        for provider in &settings.providers {
            let key = if provider.api_key.is_empty() {
                None
            } else {
                let plaintext = Zeroizing::new(provider.api_key.as_bytes().to_vec());
                Some(self.crypto.encrypt_offloaded(plaintext, None).await?)
            };
            providers.push(provider.clone().with_key(key));
        }
        Ok(settings.clone().with_providers(providers))
    }

    async fn decrypt_credentials(&self, stored: StoredSettings) -> VaultResult<SecureSettings> {
        let mut providers = Vec::with_capacity(stored.providers.len());
        for provider in &stored.providers {
            let key = match &provider.api_key {
                Some(payload) => {
                    let bytes = self.crypto.decrypt_offloaded(payload.clone(), None).await?;
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| VaultError::Crypto(CryptoFailure::DecryptionFailed))?
                }
                None => String::new(),
            };
            providers.push(provider.clone().with_key(key));
        }
        Ok(stored.with_providers(providers))
    }
}

/// Mask all but the last four characters. Keys of four characters or fewer are
/// masked completely.
pub fn mask_api_key(key: &str) -> String {
    let len = key.chars().count();
    if len <= MASK_VISIBLE {
        return "*".repeat(len);
    }
    let visible: String = key.chars().skip(len - MASK_VISIBLE).collect();
    format!("{}{visible}", "*".repeat(len - MASK_VISIBLE))
}

fn check_api_key(kind: &str, key: &str) -> ApiKeyCheck {
    if kind == "ollama" && key.is_empty() {
        return ApiKeyCheck::ok();
    }
    if key.is_empty() {
        return ApiKeyCheck::fail("API key is empty");
    }
    if key.chars().any(char::is_whitespace) {
        return ApiKeyCheck::fail("API key contains whitespace");
    }
    if key.chars().count() < MIN_KEY_LEN {
        return ApiKeyCheck::fail(format!("API key is shorter than {MIN_KEY_LEN} characters"));
    }
    match kind {
        "anthropic" if !key.starts_with("sk-ant-") => {
            ApiKeyCheck::fail("Anthropic keys start with 'sk-ant-'")
        }
        "openai" if !key.starts_with("sk-") => ApiKeyCheck::fail("OpenAI keys start with 'sk-'"),
        _ => ApiKeyCheck::ok(),
    }
}

fn checksum(settings: &SecureSettings) -> VaultResult<String> {
    let canonical = serde_json::to_vec(&serde_json::to_value(settings)?)?;
    Ok(CryptoEngine::generate_hash(canonical))
}

fn backup_key(millis: i64) -> String {
    format!("{BACKUP_PREFIX}{millis:020}")
}
