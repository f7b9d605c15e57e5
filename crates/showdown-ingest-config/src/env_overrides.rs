use crate::{IngestConfig, LogFormat};
use anyhow::{anyhow, Context, Result};

pub const ENV_PREFIX: &str = "SHOWDOWN_INGEST_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    /// Look up `key` with the SHOWDOWN_INGEST_ prefix applied.
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides to the config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut IngestConfig, env: &E) -> Result<()> {
    // Storage
    if let Some(database) = get_env_string(env, "DATABASE") {
        config.storage.database = database;
    }
    if let Some(val) = get_env_parsed::<u32, _>(env, "FLUSH_MAX_ATTEMPTS")? {
        config.storage.flush_max_attempts = val;
    }

    // Window
    if let Some(start) = get_env_string(env, "START") {
        config.window.start = start;
    }
    if let Some(end) = get_env_string(env, "END") {
        config.window.end = end;
    }

    // Search
    if let Some(url) = get_env_string(env, "SEARCH_URL") {
        config.search.base_url = url;
    }
    if let Some(format) = get_env_string(env, "FORMAT") {
        config.search.format = Some(format);
    }
    if let Some(user) = get_env_string(env, "USER") {
        config.search.user = Some(user);
    }
    if let Some(val) = get_env_parsed::<usize, _>(env, "SEARCH_CHAINS")? {
        config.search.chains = val;
    }

    // Fetch
    if let Some(val) = get_env_parsed::<usize, _>(env, "POOL_SIZE")? {
        config.fetch.pool_size = val;
    }
    if let Some(val) = get_env_parsed::<u32, _>(env, "RATE_LIMIT")? {
        config.fetch.rate_limit = val;
    }
    if let Some(val) = get_env_parsed::<u32, _>(env, "FETCH_MAX_ATTEMPTS")? {
        config.fetch.max_attempts = val;
    }
    if let Some(val) = get_env_parsed::<u64, _>(env, "FETCH_TIMEOUT_MS")? {
        config.fetch.timeout_ms = val;
    }
    if let Some(val) = get_env_parsed::<usize, _>(env, "WARMUP_PAGES")? {
        config.fetch.warmup_pages = val;
    }

    // Batch
    if let Some(val) = get_env_parsed::<usize, _>(env, "BATCH_MAX_RECORDS")? {
        config.batch.max_records = val;
    }
    if let Some(val) = get_env_parsed::<u64, _>(env, "BATCH_MAX_AGE_SECS")? {
        config.batch.max_age_secs = val;
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL") {
        config.log.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT") {
        config.log.format = format
            .parse::<LogFormat>()
            .context("Invalid SHOWDOWN_INGEST_LOG_FORMAT value")?;
    }

    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key).map(|v| v.trim().to_string())
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    E: EnvSource,
{
    match get_env_string(env, key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {}{} value '{}': {}", ENV_PREFIX, key, raw, e)),
        None => Ok(None),
    }
}
