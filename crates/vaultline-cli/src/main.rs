mod cli;
mod config;
mod sessions;
mod settings;
mod storage;

use crate::cli::{ConfigCommand, StoreCommand};
use clap::Parser;
use color_eyre::Result;
use settings::report;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vaultline_core::medium::StorageMedium;
use vaultline_storage::RecordStore;

/// Entry point wiring the CLI to the encrypted store.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        cli::Command::Version => print_version(),
        cli::Command::Health => run_health_check(&config).await?,
        cli::Command::Config(ConfigCommand::Init) => init_config(&config)?,
        cli::Command::Settings(cmd) => settings::handle(cmd, &config).await?,
        cli::Command::Sessions(cmd) => sessions::handle(cmd, &config).await?,
        cli::Command::Store(cmd) => run_store_command(cmd, &config).await?,
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("vaultline {}", env!("CARGO_PKG_VERSION"));
}

/// Opens the store with the configured master secret and round-trips a sentinel record.
async fn run_health_check(config: &config::Config) -> Result<()> {
    let services = storage::open(config).await?;
    if !services.crypto.has_key() {
        color_eyre::eyre::bail!("no master key installed");
    }
    println!("Key material: ok");
    let result = run_store_health(&services.store).await;
    services.shutdown().await;
    result?;
    println!("Storage: ok");
    Ok(())
}

async fn run_store_health<M: StorageMedium>(store: &RecordStore<M>) -> Result<()> {
    let sentinel_key = "health/sentinel";
    let payload = "ok";
    store.store(sentinel_key, payload, None).await.map_err(report)?;
    let round_trip: Option<String> = store.retrieve(sentinel_key, None).await.map_err(report)?;
    store.delete(sentinel_key).await.map_err(report)?;

    if round_trip.as_deref() != Some(payload) {
        color_eyre::eyre::bail!("storage round-trip failed");
    }
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}

async fn run_store_command(cmd: StoreCommand, config: &config::Config) -> Result<()> {
    if cmd == (StoreCommand::Wipe { yes: false }) {
        color_eyre::eyre::bail!("refusing to wipe the store without --yes");
    }
    let services = storage::open(config).await?;
    let result = store_command(cmd, &services.store).await;
    services.shutdown().await;
    result
}

async fn store_command<M: StorageMedium>(cmd: StoreCommand, store: &RecordStore<M>) -> Result<()> {
    match cmd {
        StoreCommand::Stats => {
            let stats = store.get_stats().await.map_err(report)?;
            println!(
                "Records: {} ({} encrypted), {} bytes",
                stats.total_keys, stats.encrypted_keys, stats.total_size
            );
            match stats.last_backup {
                Some(at) => println!("Last backup: {}", at.to_rfc3339()),
                None => println!("Last backup: never"),
            }
        }
        StoreCommand::Wipe { .. } => {
            let removed = store.cleanup().await.map_err(report)?;
            warn!(removed, "store wiped");
            println!("Removed {removed} entries.");
        }
    }
    Ok(())
}
