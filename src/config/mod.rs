//! Configuration module - Modular configuration management
//!
//! - types/mod.rs: Core configuration types (Config, PipelineConfig)
//! - types/pool.rs: Sandbox pool configuration
//! - types/sandbox.rs: Container runtime and toolchain configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{Config, PipelineConfig};

pub use types::pool::{generate_instance_id, PoolConfig};

pub use types::sandbox::{parse_memory_limit, ContainerConfig, ToolchainConfig};

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
