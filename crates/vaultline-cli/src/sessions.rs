use color_eyre::Result;
use vaultline_core::medium::StorageMedium;
use vaultline_session::SessionManager;

use crate::{cli::SessionsCommand, config::Config, settings::report, storage};

/// Execute a sessions subcommand using the encrypted store.
pub async fn handle(cmd: SessionsCommand, config: &Config) -> Result<()> {
    let services = storage::open(config).await?;
    let result = run(cmd, &services.sessions).await;
    services.shutdown().await;
    result
}

pub(crate) async fn run<M: StorageMedium + 'static>(
    cmd: SessionsCommand,
    sessions: &SessionManager<M>,
) -> Result<()> {
    match cmd {
        SessionsCommand::Stats => {
            let metrics = sessions.get_metrics().await.map_err(report)?;
            println!(
                "Sessions: {} total, {} active, {} expired",
                metrics.total_sessions, metrics.active_sessions, metrics.expired_sessions
            );
            println!(
                "Average duration: {}s",
                metrics.average_session_duration.as_secs()
            );
            if let Some(last) = metrics.last_cleanup {
                println!("Last cleanup: {}", last.to_rfc3339());
            }
        }
        SessionsCommand::Cleanup => {
            let removed = sessions.cleanup_expired_sessions().await.map_err(report)?;
            println!("Removed {removed} expired session(s).");
        }
    }
    Ok(())
}
