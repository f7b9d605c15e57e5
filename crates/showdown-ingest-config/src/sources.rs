// Configuration source loading.
//
// Priority order:
// 1. Environment variables (SHOWDOWN_INGEST_* prefix)
// 2. Config file path from SHOWDOWN_INGEST_CONFIG
// 3. Inline config content from SHOWDOWN_INGEST_CONFIG_CONTENT
// 4. Default config file (./showdown-ingest.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::IngestConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_PATHS: &[&str] = &["./showdown-ingest.toml"];

/// Load configuration from the environment and the default file locations.
///
/// Not validated: callers may still layer CLI overrides on top and must
/// call [`IngestConfig::validate`] afterwards.
pub fn load_config() -> Result<IngestConfig> {
    let mut config = load_from_file()?.unwrap_or_default();
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    Ok(config)
}

fn load_from_file() -> Result<Option<IngestConfig>> {
    if let Ok(path) = env::var(format!("{}CONFIG", ENV_PREFIX)) {
        return parse_file(Path::new(&path)).map(Some);
    }

    if let Ok(content) = env::var(format!("{}CONFIG_CONTENT", ENV_PREFIX)) {
        let config: IngestConfig = toml::from_str(&content)
            .context("Failed to parse inline config from SHOWDOWN_INGEST_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path);
        if path.exists() {
            return parse_file(path).map(Some);
        }
    }

    Ok(None)
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Environment overrides still apply on top of the file. Not validated.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<IngestConfig> {
    let mut config = parse_file(path.as_ref())?;
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<IngestConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}
