use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "vaultline",
    about = "Encrypted credential, settings and session store",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Run a health check against core subsystems (key material, storage).
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Inspect and modify the encrypted settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Inspect and sweep stored sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Low-level record store maintenance.
    #[command(subcommand)]
    Store(StoreCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsCommand {
    /// Print providers (masked keys), tool servers and preferences.
    Show,
    /// Export settings as JSON. Keys are redacted unless --include-sensitive.
    Export {
        #[arg(long)]
        include_sensitive: bool,
        /// Write to a file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Replace settings with a JSON document. Redacted keys keep their stored value.
    Import { path: PathBuf },
    /// Snapshot the current settings, or list snapshots with --list.
    Backup {
        #[arg(long)]
        list: bool,
    },
    /// Restore a snapshot (RFC 3339 timestamp); the newest when omitted.
    Restore {
        #[arg(long)]
        at: Option<String>,
    },
    /// Snapshot, then replace everything with defaults.
    Reset,
    /// Store an API key for a provider. Reads one line from stdin when --key is absent.
    SetKey {
        provider: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Check a provider's key format locally.
    TestKey { provider: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SessionsCommand {
    /// Show session counts and average duration.
    Stats,
    /// Remove expired sessions now.
    Cleanup,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Show record counts and sizes.
    Stats,
    /// Delete every record and backup.
    Wipe {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
}
