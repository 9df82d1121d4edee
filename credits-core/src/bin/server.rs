//! Credits ledger server binary
//!
//! Opens the ledger, starts the background sweep, and runs until ctrl-c.
//! The facade itself is consumed in-process by the marketplace backend.

use credits_core::{expiry::spawn_sweeper, Config, ConfigHandle, Ledger};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Mercato credits ledger");

    // Load configuration: hot-reloaded file when provided, env defaults otherwise
    let config = match std::env::var("CREDITS_CONFIG") {
        Ok(path) => ConfigHandle::watching(path, Duration::from_secs(30))?,
        Err(_) => ConfigHandle::fixed(Config::from_env()?),
    };

    let ledger = Ledger::with_config_handle(config)?;
    tracing::info!("Ledger opened successfully");

    let (sweeper_task, sweeper_shutdown) = spawn_sweeper(ledger.sweeper());

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down credits ledger");
    let _ = sweeper_shutdown.send(true);
    sweeper_task.await?;

    Ok(())
}
