use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use color_eyre::Result;
use dirs::data_dir;
use tracing::{debug, info};
use vaultline_session::SessionManager;
use vaultline_settings::SettingsManager;
use vaultline_storage::{
    file_medium::FileMedium,
    key_provider::{self, EnvPassphraseProvider, KeyringProvider, MasterSecretProvider},
    CryptoEngine, RecordStore,
};

use crate::config::{Config, MasterSource};

const KEYRING_SERVICE: &str = "vaultline";
const KEYRING_ACCOUNT: &str = "master-key";
const SALT_FILE: &str = "master.salt";
const RECORDS_DIR: &str = "records";

/// Resolve the default data directory for Vaultline.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("vaultline"))
}

pub fn resolve_data_dir(config: &Config) -> Result<PathBuf> {
    match &config.data_dir {
        Some(root) => Ok(root.clone()),
        None => default_data_dir(),
    }
}

/// Everything a command needs, wired in dependency order. Dropping it stops the
/// session sweep and then wipes the master key, whether or not `shutdown` ran.
pub struct Services {
    pub crypto: Arc<CryptoEngine>,
    pub store: Arc<RecordStore<FileMedium>>,
    pub sessions: Arc<SessionManager<FileMedium>>,
    pub settings: SettingsManager<FileMedium>,
}

impl Services {
    /// Build the stack under `root` around an engine that already holds its key and
    /// start the session sweep. Must be called inside a Tokio runtime.
    pub fn assemble(root: &Path, crypto: Arc<CryptoEngine>, config: &Config) -> Self {
        let medium = FileMedium::new(root.join(RECORDS_DIR));
        let store = Arc::new(RecordStore::new(medium, Arc::clone(&crypto), config.storage));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&store), config.sessions));
        sessions.start_cleanup_task();
        let settings = SettingsManager::new(Arc::clone(&store), config.settings);
        Self {
            crypto,
            store,
            sessions,
            settings,
        }
    }

    /// Wipe cached credentials, then release everything else through `Drop`.
    pub async fn shutdown(self) {
        self.settings.cleanup().await;
    }
}

impl Drop for Services {
    fn drop(&mut self) {
        self.sessions.shutdown();
        self.crypto.clear_sensitive_data();
        debug!("services released");
    }
}

/// Open the production stack: resolve the master secret from the configured
/// source, install it, persist the KDF salt on first use and wire the managers.
pub async fn open(config: &Config) -> Result<Services> {
    let root = resolve_data_dir(config)?;
    fs::create_dir_all(&root)?;
    debug!(?root, "opening vaultline store");

    let crypto = Arc::new(CryptoEngine::new(config.kdf));
    let salt_path = root.join(SALT_FILE);
    let provider: Box<dyn MasterSecretProvider> = match config.master.source {
        MasterSource::Keyring => Box::new(KeyringProvider::new(KEYRING_SERVICE, KEYRING_ACCOUNT)),
        MasterSource::Env => Box::new(EnvPassphraseProvider::new(
            config.master.env_var.clone(),
            read_salt(&salt_path)?,
        )),
    };

    let secret = provider
        .master_secret()
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;
    if let Some(salt) = key_provider::install_offloaded(&crypto, secret)
        .await
        .map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?
    {
        if !salt_path.exists() {
            write_salt(&salt_path, &salt)?;
            info!(path = %salt_path.display(), "persisted new master key salt");
        }
    }

    Ok(Services::assemble(&root, crypto, config))
}

fn read_salt(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn write_salt(path: &Path, salt: &[u8]) -> Result<()> {
    fs::write(path, salt)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Helper for tests: a stack rooted at a temp dir with an in-memory key and cheap KDF.
#[cfg(test)]
pub async fn test_services(root: &Path) -> Services {
    use vaultline_storage::{key_provider::InMemoryKeyProvider, KdfParams};

    let config = Config {
        kdf: KdfParams::minimal(),
        ..Config::default()
    };
    let crypto = Arc::new(CryptoEngine::new(config.kdf));
    let secret = InMemoryKeyProvider::default()
        .master_secret()
        .await
        .expect("memory key");
    key_provider::install_offloaded(&crypto, secret)
        .await
        .expect("install");
    Services::assemble(root, crypto, &config)
}
