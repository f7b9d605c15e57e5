// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

const MAX_SEARCH_CHAINS: usize = 16;

pub fn validate_config(config: &IngestConfig) -> Result<()> {
    validate_storage_config(&config.storage)?;
    validate_window_config(&config.window)?;
    validate_search_config(&config.search)?;
    validate_fetch_config(&config.fetch)?;
    validate_batch_config(&config.batch)?;
    validate_log_config(&config.log)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    if config.database.trim().is_empty() {
        bail!("storage.database must not be empty");
    }

    if config.flush_max_attempts == 0 {
        bail!("storage.flush_max_attempts must be greater than 0");
    }

    Ok(())
}

fn validate_window_config(config: &WindowConfig) -> Result<()> {
    let start = config.start_timestamp()?;
    let end = config.end_timestamp()?;

    if start >= end {
        bail!(
            "window.start ({}) must be earlier than window.end ({})",
            config.start,
            config.end
        );
    }

    Ok(())
}

fn validate_search_config(config: &SearchConfig) -> Result<()> {
    if config.base_url.trim().is_empty() {
        bail!("search.base_url must not be empty");
    }

    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        bail!("search.base_url must be an http(s) URL");
    }

    if config.chains == 0 || config.chains > MAX_SEARCH_CHAINS {
        bail!(
            "search.chains must be between 1 and {} (got {})",
            MAX_SEARCH_CHAINS,
            config.chains
        );
    }

    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<()> {
    if config.pool_size == 0 {
        bail!("fetch.pool_size must be greater than 0");
    }

    if config.rate_limit == 0 {
        bail!("fetch.rate_limit must be greater than 0");
    }

    if config.max_attempts == 0 {
        bail!("fetch.max_attempts must be greater than 0");
    }

    if config.timeout_ms == 0 {
        bail!("fetch.timeout_ms must be greater than 0");
    }

    // Warn about settings likely to get the client throttled
    if config.pool_size > 1_000 {
        warn!(
            pool_size = config.pool_size,
            "fetch.pool_size is very large; the remote service may throttle"
        );
    }

    if config.rate_limit > 500 {
        warn!(
            rate_limit = config.rate_limit,
            "fetch.rate_limit is very high; the remote service may throttle"
        );
    }

    Ok(())
}

fn validate_batch_config(config: &BatchConfig) -> Result<()> {
    if config.max_records == 0 {
        bail!("batch.max_records must be greater than 0");
    }

    if config.max_age_secs == 0 {
        bail!("batch.max_age_secs must be greater than 0");
    }

    if config.max_records > 100_000 {
        warn!(
            max_records = config.max_records,
            "batch.max_records is very large; replay logs may use a lot of memory"
        );
    }

    Ok(())
}

fn validate_log_config(config: &LogConfig) -> Result<()> {
    if config.level.trim().is_empty() {
        bail!("log.level must not be empty");
    }

    Ok(())
}
