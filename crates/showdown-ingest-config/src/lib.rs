// showdown-ingest-config - Configuration for the replay ingestion pipeline
//
// Supports configuration from multiple sources:
// 1. CLI flags (applied by the binary, highest priority)
// 2. Environment variables (SHOWDOWN_INGEST_* prefix)
// 3. Config file path from SHOWDOWN_INGEST_CONFIG env var
// 4. Config file contents from SHOWDOWN_INGEST_CONFIG_CONTENT env var
// 5. Default config file location (./showdown-ingest.toml)
// 6. Built-in defaults (lowest priority)

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{apply_env_overrides, EnvSource, ENV_PREFIX};

/// Layout of `--start` / `--end` values.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Main ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database: String,
    /// Consecutive failed flushes tolerated before the run aborts.
    pub flush_max_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: "replays.db".to_string(),
            flush_max_attempts: 5,
        }
    }
}

/// Ingestion window, interpreted as UTC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
}

impl WindowConfig {
    pub fn start_timestamp(&self) -> Result<i64> {
        parse_timestamp(&self.start).context("Invalid window.start")
    }

    pub fn end_timestamp(&self) -> Result<i64> {
        parse_timestamp(&self.end).context("Invalid window.end")
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: "2024-11-01_10:00:00".to_string(),
            end: "2024-11-01_14:00:00".to_string(),
        }
    }
}

/// Remote search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Independent cursor chains the window is split across.
    pub chains: usize,
}

impl SearchConfig {
    /// Format filter with empty strings treated as "no filter".
    pub fn format_filter(&self) -> Option<&str> {
        self.format.as_deref().filter(|f| !f.is_empty())
    }

    pub fn user_filter(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://replay.pokemonshowdown.com".to_string(),
            format: Some("gen9vgc2024regh".to_string()),
            user: None,
            chains: 1,
        }
    }
}

/// Fetch layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum fetches in flight at once.
    pub pool_size: usize,
    /// Outbound requests per second, searches included.
    pub rate_limit: u32,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub timeout_ms: u64,
    /// Search pages to collect before the first fetch is submitted.
    pub warmup_pages: usize,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pool_size: 50,
            rate_limit: 50,
            max_attempts: 3,
            initial_backoff_ms: 100,
            timeout_ms: 2_000,
            warmup_pages: 0,
        }
    }
}

/// Persistence batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_records: usize,
    pub max_age_secs: u64,
}

impl BatchConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_records: 51,
            max_age_secs: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub progress_interval_secs: u64,
}

impl LogConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            progress_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => bail!("Unsupported log format: {}. Supported: text, json", s),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a window bound into epoch seconds.
///
/// Accepts `%Y-%m-%d_%H:%M:%S` (UTC), RFC 3339, or raw epoch seconds.
pub fn parse_timestamp(value: &str) -> Result<i64> {
    let value = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc().timestamp());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.timestamp());
    }
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    bail!(
        "Unrecognized timestamp '{}': expected {}, RFC 3339, or epoch seconds",
        value,
        TIMESTAMP_FORMAT
    )
}

impl IngestConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from an explicit file (for the CLI --config flag)
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
