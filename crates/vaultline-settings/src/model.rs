use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use vaultline_storage::EncryptedPayload;
use zeroize::Zeroize;

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Stands in for a credential in non-sensitive exports.
pub const REDACTED: &str = "[REDACTED]";

/// One LLM provider. `K` is the credential representation: plaintext `String` in
/// memory, `Option<EncryptedPayload>` at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig<K = String> {
    pub id: String,
    pub name: String,
    /// Provider family: `openai`, `anthropic`, `ollama` or anything custom.
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub api_key: K,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

impl<K> ProviderConfig<K> {
    pub fn with_key<K2>(self, api_key: K2) -> ProviderConfig<K2> {
        ProviderConfig {
            id: self.id,
            name: self.name,
            kind: self.kind,
            api_key,
            base_url: self.base_url,
            models: self.models,
            default_model: self.default_model,
            enabled: self.enabled,
        }
    }
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            api_key: String::new(),
            base_url: None,
            models: Vec::new(),
            default_model: None,
            enabled: false,
        }
    }
}

fn default_kind() -> String {
    "custom".to_string()
}

/// A Model-Context-Protocol tool server launched as a child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerConfig {
    pub id: String,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// `light`, `dark` or `system`; other values load with a warning.
    pub theme: String,
    pub language: String,
    pub default_provider: Option<String>,
    pub stream_responses: bool,
    pub show_tool_calls: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "system".into(),
            language: "en".into(),
            default_provider: None,
            stream_responses: true,
            show_tool_calls: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityPolicy {
    pub session_timeout_minutes: i64,
    pub max_requests_per_minute: u32,
    pub require_fingerprint_match: bool,
    pub audit_log_enabled: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 60,
            max_requests_per_minute: 60,
            require_fingerprint_match: true,
            audit_log_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesPatch {
    pub theme: Option<String>,
    pub language: Option<String>,
    pub default_provider: Option<Option<String>>,
    pub stream_responses: Option<bool>,
    pub show_tool_calls: Option<bool>,
}

impl PreferencesPatch {
    pub(crate) fn apply(self, prefs: &mut Preferences) {
        if let Some(theme) = self.theme {
            prefs.theme = theme;
        }
        if let Some(language) = self.language {
            prefs.language = language;
        }
        if let Some(default_provider) = self.default_provider {
            prefs.default_provider = default_provider;
        }
        if let Some(stream) = self.stream_responses {
            prefs.stream_responses = stream;
        }
        if let Some(show) = self.show_tool_calls {
            prefs.show_tool_calls = show;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityPatch {
    pub session_timeout_minutes: Option<i64>,
    pub max_requests_per_minute: Option<u32>,
    pub require_fingerprint_match: Option<bool>,
    pub audit_log_enabled: Option<bool>,
}

impl SecurityPatch {
    pub(crate) fn apply(self, policy: &mut SecurityPolicy) {
        if let Some(timeout) = self.session_timeout_minutes {
            policy.session_timeout_minutes = timeout;
        }
        if let Some(rate) = self.max_requests_per_minute {
            policy.max_requests_per_minute = rate;
        }
        if let Some(require) = self.require_fingerprint_match {
            policy.require_fingerprint_match = require;
        }
        if let Some(audit) = self.audit_log_enabled {
            policy.audit_log_enabled = audit;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureSettings<K = String> {
    #[serde(default)]
    pub providers: Vec<ProviderConfig<K>>,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub security_policy: SecurityPolicy,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub last_updated: DateTime<Utc>,
}

/// Settings as persisted: every credential individually encrypted, `None` when empty.
pub type StoredSettings = SecureSettings<Option<EncryptedPayload>>;

impl<K> SecureSettings<K> {
    /// Same settings with a different provider list (and credential type).
    pub fn with_providers<K2>(self, providers: Vec<ProviderConfig<K2>>) -> SecureSettings<K2> {
        SecureSettings {
            providers,
            tool_servers: self.tool_servers,
            preferences: self.preferences,
            security_policy: self.security_policy,
            version: self.version,
            last_updated: self.last_updated,
        }
    }
}

impl SecureSettings {
    /// Full default aggregate: the common providers, disabled and without keys.
    pub fn defaults(now: DateTime<Utc>) -> Self {
        let provider = |id: &str, name: &str, base_url: &str, model: &str| ProviderConfig {
            base_url: Some(base_url.to_string()),
            models: vec![model.to_string()],
            default_model: Some(model.to_string()),
            ..ProviderConfig::new(id, name, id)
        };

        Self {
            providers: vec![
                provider("openai", "OpenAI", "https://api.openai.com/v1", "gpt-4o-mini"),
                provider(
                    "anthropic",
                    "Anthropic",
                    "https://api.anthropic.com",
                    "claude-3-5-haiku-latest",
                ),
                provider("ollama", "Ollama", "http://localhost:11434", "llama3.1"),
            ],
            tool_servers: Vec::new(),
            preferences: Preferences::default(),
            security_policy: SecurityPolicy::default(),
            version: SETTINGS_SCHEMA_VERSION,
            last_updated: now,
        }
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Overwrite every credential string in place before the aggregate is dropped.
    pub fn wipe_credentials(&mut self) {
        for provider in &mut self.providers {
            provider.api_key.zeroize();
        }
    }

    /// Copy with every non-empty credential replaced by `REDACTED`.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for provider in &mut copy.providers {
            if !provider.api_key.is_empty() {
                provider.api_key = REDACTED.to_string();
            }
        }
        copy
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "K: Deserialize<'de> + Default"))]
pub struct SettingsBackup<K = String> {
    pub settings: SecureSettings<K>,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    /// SHA-256 over the canonical JSON of the plaintext `settings`.
    pub checksum: String,
}

/// Bring a stored or imported settings document up to the current schema. Runs once,
/// before deserialization. Documents without a version predate `toolServers`, which
/// used to be called `mcpServers`.
pub(crate) fn upgrade(mut doc: Value) -> Value {
    let Some(obj) = doc.as_object_mut() else {
        return doc;
    };
    let version = obj.get("version").and_then(Value::as_u64).unwrap_or(0);
    if version >= u64::from(SETTINGS_SCHEMA_VERSION) {
        return doc;
    }

    if !obj.contains_key("toolServers") {
        if let Some(servers) = obj.remove("mcpServers") {
            obj.insert("toolServers".into(), servers);
        }
    }
    obj.insert("version".into(), Value::from(SETTINGS_SCHEMA_VERSION));
    debug!(from = version, to = SETTINGS_SCHEMA_VERSION, "settings document upgraded");
    doc
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn upgrade_renames_legacy_servers_and_stamps_version() {
        let doc = json!({
            "providers": [],
            "mcpServers": [{"id": "fs", "name": "Files", "command": "mcp-fs"}]
        });
        let upgraded = upgrade(doc);
        assert_eq!(upgraded["version"], json!(SETTINGS_SCHEMA_VERSION));
        assert!(upgraded.get("mcpServers").is_none());

        let settings: SecureSettings = serde_json::from_value(upgraded).expect("parse");
        assert_eq!(settings.tool_servers[0].command, "mcp-fs");
        assert_eq!(settings.preferences, Preferences::default());
    }

    #[test]
    fn current_documents_are_untouched() {
        let doc = json!({"version": SETTINGS_SCHEMA_VERSION, "mcpServers": []});
        assert_eq!(upgrade(doc.clone()), doc);
    }

    #[test]
    fn redacted_hides_only_present_keys() {
        let mut settings = SecureSettings::defaults(Utc::now());
        settings.providers[0].api_key = "sk-live".into();
        let redacted = settings.redacted();
        assert_eq!(redacted.providers[0].api_key, REDACTED);
        assert_eq!(redacted.providers[1].api_key, "");
        assert_eq!(settings.providers[0].api_key, "sk-live");
    }

    #[test]
    fn wipe_clears_credentials() {
        let mut settings = SecureSettings::defaults(Utc::now());
        settings.providers[0].api_key = "sk-live".into();
        settings.wipe_credentials();
        assert!(settings.providers.iter().all(|p| p.api_key.is_empty()));
    }

    #[test]
    fn provider_defaults_fill_missing_fields() {
        let provider: ProviderConfig =
            serde_json::from_value(json!({"id": "x", "name": "X"})).expect("parse");
        assert_eq!(provider.kind, "custom");
        assert_eq!(provider.api_key, "");
        assert!(!provider.enabled);
    }
}
