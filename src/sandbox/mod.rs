//! Sandbox module - Isolated execution units and the commands run inside them
//!
//! - runtime.rs: the capability the pool drives (`SandboxRuntime`)
//! - container.rs: Docker implementation over bollard
//! - executor.rs: bounded-time command execution
//! - shell.rs: the scripts issued inside a sandbox

mod container;
mod executor;
mod runtime;
pub mod shell;

#[cfg(test)]
pub(crate) mod fake;

pub use container::DockerRuntime;
pub use executor::{cap_output, CommandExecutor, Step, TRUNCATION_MARKER};
pub use runtime::{CommandOutput, ResourceLimits, SandboxInfo, SandboxRuntime, SandboxSpec};

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

/// Connect the Docker runtime described by `config`
pub async fn connect_runtime(config: &Config) -> Result<Arc<dyn SandboxRuntime>> {
    let runtime = DockerRuntime::connect(&config.container, config.pipeline.max_output_bytes).await?;
    Ok(Arc::new(runtime))
}
