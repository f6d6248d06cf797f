use std::{
    fs,
    path::{Path, PathBuf},
};

use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use vaultline_session::SessionConfig;
use vaultline_settings::SettingsConfig;
use vaultline_storage::{KdfParams, RecordStoreConfig};

/// Environment variable read by the `env` master source unless overridden.
pub const DEFAULT_PASSPHRASE_VAR: &str = "VAULTLINE_PASSPHRASE";

/// User-level configuration loaded from `~/.config/vaultline/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for data directory (records, backups, KDF salt).
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub storage: RecordStoreConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub kdf: KdfParams,
    #[serde(default)]
    pub master: MasterConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MasterSource {
    /// Random 256-bit key held by the OS keychain.
    #[default]
    Keyring,
    /// Passphrase from an environment variable plus a salt persisted in the data dir.
    Env,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MasterConfig {
    pub source: MasterSource,
    pub env_var: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            source: MasterSource::Keyring,
            env_var: DEFAULT_PASSPHRASE_VAR.to_string(),
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("vaultline").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}
