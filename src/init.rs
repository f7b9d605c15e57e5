// Logging/tracing setup

use showdown_ingest_config::{IngestConfig, LogFormat};

/// Initialize tracing from the `log` section of the config.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(config: &IngestConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore the error if a subscriber is already set (idempotent)
    let _ = match config.log.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}
