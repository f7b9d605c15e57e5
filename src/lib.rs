// showdown-ingest - replay ingestion pipeline
//
// Walks the replay search endpoint backwards through a time window, fetches
// every replay not already stored, and persists them to SQLite in batches.
//
// Features:
// - One or more search cursor chains with strictly decreasing cursors
// - Bounded, rate-limited fetching with retry and backoff
// - Dedup against stored ids, insert-or-ignore writes
// - Size- and age-triggered batch flushes, retried on failure
// - Structured logging with tracing

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

mod init;
mod orchestrator;
mod report;

pub use init::init_tracing;
pub use orchestrator::Orchestrator;
pub use report::{FailedFetch, IngestReport};
pub use showdown_ingest_config::IngestConfig;

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping ingestion");
        },
        _ = terminate => {
            info!("Received SIGTERM, stopping ingestion");
        },
    }
}

/// Entry point that loads configuration from the environment and default
/// file locations.
pub async fn run() -> Result<IngestReport> {
    let config = IngestConfig::load().context("Failed to load configuration")?;
    run_with_config(config).await
}

/// Entry point with pre-loaded configuration (for CLI usage)
pub async fn run_with_config(config: IngestConfig) -> Result<IngestReport> {
    init_tracing(&config);
    config.validate().context("Invalid configuration")?;

    let orchestrator = Orchestrator::from_config(config).await?;
    let report = orchestrator.run_until(shutdown_signal()).await?;

    if report.interrupted {
        warn!(
            persisted = report.rows_inserted,
            "Ingestion interrupted; rerun with the same window to resume"
        );
    }
    Ok(report)
}
