//! Settings aggregate for the chat application: LLM provider credentials, tool-server
//! definitions, preferences and security policy. Credentials are encrypted one by one
//! before the aggregate is written through the record store.

pub mod manager;
pub mod model;
pub mod validate;

pub use manager::{mask_api_key, ApiKeyCheck, SettingsConfig, SettingsManager, SETTINGS_KEY};
pub use model::{
    Preferences, PreferencesPatch, ProviderConfig, SecureSettings, SecurityPatch, SecurityPolicy,
    SettingsBackup, StoredSettings, ToolServerConfig, REDACTED, SETTINGS_SCHEMA_VERSION,
};
pub use validate::{validate_settings, ValidationReport};
