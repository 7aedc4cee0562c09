//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().map_or(false, |ext| ext == "json") {
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().map_or(false, |ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have the
/// highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`. Unparsable values are ignored.
pub(crate) fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(id) = lookup("SANDPOOL_INSTANCE_ID") {
        config.pool.instance_id = Some(id);
    }
    if let Some(host) = lookup("DOCKER_HOST") {
        config.container.docker_host = Some(host);
    }
    if let Some(image) = lookup("SANDPOOL_IMAGE") {
        config.container.image = image;
    }
    if let Some(limit) = lookup("SANDPOOL_MEMORY_LIMIT") {
        config.container.memory_limit = limit;
    }
    if let Some(v) = lookup("SANDPOOL_CPU_LIMIT").and_then(|v| v.parse().ok()) {
        config.container.cpu_limit = v;
    }
    if let Some(v) = lookup("SANDPOOL_POOL_SIZE").and_then(|v| v.parse().ok()) {
        config.pool.target_size = v;
    }
    if let Some(v) = lookup("SANDPOOL_MAX_SANDBOXES").and_then(|v| v.parse().ok()) {
        config.pool.max_total = v;
    }
    if let Some(v) = lookup("SANDPOOL_WORKERS").and_then(|v| v.parse().ok()) {
        config.pipeline.workers = v;
    }
    if let Some(v) = lookup("SANDPOOL_PRE_CLEANUP") {
        config.pool.pre_use_validation = parse_flag(&v);
    }
    if let Some(v) = lookup("SANDPOOL_POST_CLEANUP") {
        config.pool.post_use_cleanup = parse_flag(&v);
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().map_or(false, |ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
