use std::{fs, io::BufRead};

use chrono::{DateTime, Utc};
use color_eyre::Result;
use vaultline_core::{error::VaultError, medium::StorageMedium};
use vaultline_settings::{mask_api_key, SettingsManager};

use crate::{cli::SettingsCommand, config::Config, storage};

/// Execute a settings subcommand against the encrypted store.
pub async fn handle(cmd: SettingsCommand, config: &Config) -> Result<()> {
    let services = storage::open(config).await?;
    let result = run(cmd, &services.settings).await;
    services.shutdown().await;
    result
}

pub(crate) async fn run<M: StorageMedium>(
    cmd: SettingsCommand,
    settings: &SettingsManager<M>,
) -> Result<()> {
    settings.load_settings().await.map_err(report)?;

    match cmd {
        SettingsCommand::Show => {
            let current = settings.get_settings().await.map_err(report)?;
            println!("Providers:");
            for provider in &current.providers {
                let key = if provider.api_key.is_empty() {
                    "(no key)".to_string()
                } else {
                    mask_api_key(&provider.api_key)
                };
                let state = if provider.enabled { "on" } else { "off" };
                println!("  {} [{state}] {} {key}", provider.id, provider.name);
            }
            if !current.tool_servers.is_empty() {
                println!("Tool servers:");
                for server in &current.tool_servers {
                    println!("  {} {} {}", server.id, server.command, server.args.join(" "));
                }
            }
            println!(
                "Theme: {}  Language: {}  Session timeout: {}m",
                current.preferences.theme,
                current.preferences.language,
                current.security_policy.session_timeout_minutes
            );
            println!("Last updated: {}", current.last_updated.to_rfc3339());
        }
        SettingsCommand::Export {
            include_sensitive,
            output,
        } => {
            let json = settings
                .export_settings(include_sensitive)
                .await
                .map_err(report)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)?;
                    println!("Settings exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        SettingsCommand::Import { path } => {
            let json = fs::read_to_string(&path)?;
            let outcome = settings.import_settings(&json).await.map_err(report)?;
            for warning in &outcome.warnings {
                println!("warning: {warning}");
            }
            println!("Settings imported from {}", path.display());
        }
        SettingsCommand::Backup { list: true } => {
            let stamps = settings.list_backups().await.map_err(report)?;
            if stamps.is_empty() {
                println!("No backups yet. Create one with `vaultline settings backup`.");
            }
            for stamp in stamps {
                println!("{}", stamp.to_rfc3339());
            }
        }
        SettingsCommand::Backup { list: false } => {
            let backup = settings.create_backup().await.map_err(report)?;
            println!("Backup created at {}", backup.timestamp.to_rfc3339());
        }
        SettingsCommand::Restore { at } => {
            let timestamp = match at {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc),
                None => settings
                    .list_backups()
                    .await
                    .map_err(report)?
                    .first()
                    .copied()
                    .ok_or_else(|| color_eyre::eyre::eyre!("no settings backups to restore"))?,
            };
            let backup = settings.load_backup(timestamp).await.map_err(report)?;
            settings.restore_from_backup(backup).await.map_err(report)?;
            println!("Settings restored from {}", timestamp.to_rfc3339());
        }
        SettingsCommand::Reset => {
            settings.reset_to_defaults().await.map_err(report)?;
            println!("Settings reset to defaults (previous state backed up).");
        }
        SettingsCommand::SetKey { provider, key } => {
            let key = match key {
                Some(key) => key,
                None => read_key_line()?,
            };
            let mut config = settings
                .get_settings()
                .await
                .map_err(report)?
                .provider(&provider)
                .cloned()
                .ok_or_else(|| color_eyre::eyre::eyre!("unknown provider '{provider}'"))?;
            config.api_key = key.trim().to_string();
            config.enabled = true;
            settings.update_llm_provider(config).await.map_err(report)?;

            let masked = settings.get_masked_api_key(&provider).await.map_err(report)?;
            println!("Stored key for {provider}: {masked}");
        }
        SettingsCommand::TestKey { provider } => {
            let check = settings.test_api_key(&provider).await.map_err(report)?;
            match check.error {
                None => println!("{provider}: key format ok"),
                Some(reason) => println!("{provider}: {reason}"),
            }
        }
    }

    Ok(())
}

fn read_key_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

pub(crate) fn report(err: VaultError) -> color_eyre::Report {
    color_eyre::eyre::eyre!(err.to_string())
}
