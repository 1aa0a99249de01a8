//! Ticket registry cleaner.
//!
//! Connects to the configured registry backend and removes expired tickets
//! on an interval until interrupted.

use cas_core::clock::SystemClock;
use cas_core::config::CasConfig;
use cas_core::registry::{run_cleaner, TicketRegistry, TicketRegistryCleaner};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CasConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.observability.log_level.clone().into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(backend = ?config.registry_backend, "Starting ticket registry cleaner");

    if !config.registry_cleaner_enabled {
        warn!("Registry cleaner disabled by configuration, exiting");
        return Ok(());
    }

    let registry = TicketRegistry::from_config(&config, Arc::new(SystemClock))
        .await
        .map_err(|e| {
            error!("Failed to initialize ticket registry: {}", e);
            e
        })?;
    info!(encrypted = registry.is_encrypted(), "Ticket registry ready");

    let cancel_token = CancellationToken::new();
    let cleaner = TicketRegistryCleaner::new(Arc::new(registry));
    let task = tokio::spawn(run_cleaner(
        cleaner,
        config.registry_cleaner_interval,
        cancel_token.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    cancel_token.cancel();
    task.await?;

    info!("Ticket registry cleaner stopped");
    Ok(())
}
