mod api;
mod bootstrap;
mod health;
mod notifier;

use std::time::Duration;

use almox_core::config::{AppConfig, LoadOptions};
use anyhow::Result;
use tracing::{info, warn};

fn init_logging(config: &AppConfig) {
    use almox_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let address = app.config.server_address();
    let router = api::router(app.workflow.clone()).merge(health::router(health::HealthState {
        db_pool: app.db_pool.clone(),
        dispatch_stats: app.dispatch_stats.clone(),
    }));
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "almox-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "almox-server stopping"
    );

    // The worker exits once the last dispatcher handle is gone and the queue is drained.
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    drop(app.workflow);
    if let Some(worker) = app.notification_worker {
        if tokio::time::timeout(grace, worker).await.is_err() {
            warn!(
                event_name = "system.server.notification_drain_timeout",
                correlation_id = "shutdown",
                "pending notifications not drained before shutdown deadline"
            );
        }
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
