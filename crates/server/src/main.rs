mod bootstrap;
mod console;

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use turnero_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use turnero_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_ascii_lowercase()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging depends on config, so config errors go to stderr through anyhow.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config);

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "turnero-server started"
    );

    tokio::select! {
        result = app.gateway.start() => {
            result?;
            tracing::info!(
                event_name = "system.server.gateway_closed",
                correlation_id = "bootstrap",
                "chat gateway closed; reminders keep running until shutdown"
            );
            wait_for_shutdown().await?;
        }
        result = wait_for_shutdown() => result?,
    }

    let cancelled = app.service.shutdown();
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        cancelled_reminders = cancelled,
        "turnero-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
