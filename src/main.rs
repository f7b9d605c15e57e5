use anyhow::{Context, Result};
use clap::Parser;
use showdown_ingest::IngestConfig;
use std::path::PathBuf;

/// Ingest Pokemon Showdown replays into a local SQLite database
#[derive(Parser)]
#[command(name = "showdown-ingest")]
#[command(version)]
#[command(about = "Ingest Pokemon Showdown replays into a local SQLite database", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(short = 'n', long, value_name = "PATH")]
    database: Option<String>,

    /// Window start, e.g. 2024-11-01_10:00:00 (UTC)
    #[arg(short, long, value_name = "TIME")]
    start: Option<String>,

    /// Window end, e.g. 2024-11-01_14:00:00 (UTC)
    #[arg(short, long, value_name = "TIME")]
    end: Option<String>,

    /// Format id to search for; pass an empty string for all formats
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<String>,

    /// Only replays involving this user
    #[arg(short, long, value_name = "USER")]
    user: Option<String>,

    /// Flush to the database every N replays
    #[arg(short, long, value_name = "N")]
    batch_size: Option<usize>,

    /// Maximum concurrent replay fetches
    #[arg(short, long, value_name = "N")]
    pool_size: Option<usize>,

    /// Maximum requests per second to the replay service
    #[arg(long, value_name = "N")]
    rate_limit: Option<u32>,

    /// Number of parallel search chains
    #[arg(long, value_name = "N")]
    chains: Option<usize>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration (file + environment)
    let mut config = if let Some(config_path) = &cli.config {
        IngestConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        IngestConfig::load().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);

    // Step 3: Initialize tracing early so validation logs show up
    // Note: run_with_config will also call init_tracing, but that's idempotent
    showdown_ingest::init_tracing(&config);
    config.validate().context("Invalid configuration")?;

    display_startup_info(&config);

    let report = showdown_ingest::run_with_config(config).await?;
    println!("{report}");
    Ok(())
}

fn apply_cli_overrides(config: &mut IngestConfig, cli: &Cli) {
    if let Some(database) = &cli.database {
        config.storage.database = database.clone();
    }
    if let Some(start) = &cli.start {
        config.window.start = start.clone();
    }
    if let Some(end) = &cli.end {
        config.window.end = end.clone();
    }
    if let Some(format) = &cli.format {
        config.search.format = Some(format.clone());
    }
    if let Some(user) = &cli.user {
        config.search.user = Some(user.clone());
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch.max_records = batch_size;
    }
    if let Some(pool_size) = cli.pool_size {
        config.fetch.pool_size = pool_size;
    }
    if let Some(rate_limit) = cli.rate_limit {
        config.fetch.rate_limit = rate_limit;
    }
    if let Some(chains) = cli.chains {
        config.search.chains = chains;
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
}

fn display_startup_info(config: &IngestConfig) {
    use tracing::info;

    info!("╭─────────────────────────────────────────────────");
    info!("│ showdown-ingest v{}", env!("CARGO_PKG_VERSION"));
    info!("├─────────────────────────────────────────────────");
    info!("│ Database: {}", config.storage.database);
    info!("│ Window: {} .. {} (UTC)", config.window.start, config.window.end);
    info!("│ Service: {}", config.search.base_url);
    info!(
        "│ Format: {}",
        config.search.format_filter().unwrap_or("(any)")
    );
    if let Some(user) = config.search.user_filter() {
        info!("│ User: {}", user);
    }
    info!("│ Search chains: {}", config.search.chains);
    info!(
        "│ Fetch: {} concurrent, {} req/s, {} attempts",
        config.fetch.pool_size, config.fetch.rate_limit, config.fetch.max_attempts
    );
    info!(
        "│ Batching: {} replays or {}s",
        config.batch.max_records, config.batch.max_age_secs
    );
    info!("│ Log level: {}", config.log.level);
    info!("╰─────────────────────────────────────────────────");
}
