//! moodledb-exporter - Prometheus exporter for Moodle database metrics.
//!
//! Periodically queries the Moodle MySQL database and republishes the results
//! as gauges on an HTTP `/metrics` endpoint.

mod catalog;
mod collector;
mod config;
mod db;
mod error;
mod http;
mod metrics;
mod telemetry;

use crate::collector::{Collector, CycleSettings};
use crate::config::Config;
use crate::db::MySqlConnector;
use crate::metrics::MetricRegistry;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    // Optional TOML file; environment variables take precedence over it.
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(Path::new)).map_err(|e| {
        error!(path = ?config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(
        host = %config.db_host,
        port = config.db_port,
        database = %config.db_name,
        interval_secs = config.sleep_interval,
        "Starting moodledb-exporter"
    );

    let registry = Arc::new(MetricRegistry::new()?);
    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let listener = http::bind(config.server_port)
        .await
        .with_context(|| format!("failed to bind metrics port {}", config.server_port))?;
    let server = tokio::spawn(http::serve(
        listener,
        Arc::clone(&registry),
        shutdown.clone(),
    ));
    info!(port = config.server_port, "MoodleDB Metrics Exporter started");

    let collector = Collector::new(
        MySqlConnector::new(&config),
        Arc::clone(&registry),
        CycleSettings::from(&config),
    );
    collector.run(shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = server.await {
        error!(error = %e, "HTTP server task failed");
    }
    info!("Shutdown complete");
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
            _ = terminate => info!("Received SIGTERM"),
        }
        token.cancel();
    });
}
