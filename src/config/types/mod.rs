//! Configuration types module
//!
//! Re-exports all configuration types.

pub mod pool;
pub mod sandbox;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sandbox pool configuration
    #[serde(default)]
    pub pool: pool::PoolConfig,

    /// Container runtime configuration
    #[serde(default)]
    pub container: sandbox::ContainerConfig,

    /// Compile/run toolchain
    #[serde(default)]
    pub toolchain: sandbox::ToolchainConfig,

    /// Execution pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables and files
    ///
    /// It loads configuration from:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Execution pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent pipeline workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Submissions queued ahead of the workers before callers run work themselves
    #[serde(default = "default_backlog")]
    pub backlog: usize,
    /// Bound on transferring source or stdin into a sandbox
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,
    /// Bound on the compile step
    #[serde(with = "humantime_serde", default = "default_step_timeout")]
    pub compile_timeout: Duration,
    /// Bound on the run step
    #[serde(with = "humantime_serde", default = "default_step_timeout")]
    pub run_timeout: Duration,
    /// Largest accepted source, in bytes
    #[serde(default = "default_max_source")]
    pub max_source_bytes: usize,
    /// Captured stdout/stderr are cut at this many bytes
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: default_workers(),
            backlog: default_backlog(),
            write_timeout: default_write_timeout(),
            compile_timeout: default_step_timeout(),
            run_timeout: default_step_timeout(),
            max_source_bytes: default_max_source(),
            max_output_bytes: default_max_output(),
        }
    }
}

fn default_workers() -> usize {
    10
}

fn default_backlog() -> usize {
    100
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_source() -> usize {
    256 * 1024
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.pipeline.workers, 10);
        assert_eq!(config.pipeline.backlog, 100);
        assert_eq!(config.pipeline.compile_timeout, Duration::from_secs(30));
        assert_eq!(config.pool.target_size, 3);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config: Config = json5::from_str("{}").unwrap();
        assert_eq!(config.pipeline.max_output_bytes, 1024 * 1024);
        assert_eq!(config.container.cpu_limit, 1.0);
    }
}
