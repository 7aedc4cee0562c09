//! Sandbox configuration types
//!
//! Configuration for the container runtime and the toolchain run inside it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Docker daemon address (`tcp://`, `http://` or `unix://`); local defaults when unset
    #[serde(default)]
    pub docker_host: Option<String>,
    /// Docker image every sandbox is created from
    #[serde(default = "default_image")]
    pub image: String,
    /// Memory limit
    #[serde(default = "default_memory")]
    pub memory_limit: String,
    /// CPU limit (number of CPUs)
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Working directory inside each sandbox
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Pull the image at startup when it is missing
    #[serde(default = "default_true")]
    pub pull_image: bool,
    /// Grace period given to a sandbox before it is killed on stop
    #[serde(with = "humantime_serde", default = "default_stop_grace")]
    pub stop_grace: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            docker_host: None,
            image: default_image(),
            memory_limit: default_memory(),
            cpu_limit: default_cpu(),
            workspace: default_workspace(),
            pull_image: true,
            stop_grace: default_stop_grace(),
        }
    }
}

impl ContainerConfig {
    /// Memory limit in bytes, if the configured value parses
    pub fn memory_bytes(&self) -> Option<i64> {
        parse_memory_limit(&self.memory_limit)
    }

    /// CPU limit in units of 10^-9 CPUs
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

fn default_image() -> String {
    "openjdk:8-jdk-alpine".to_string()
}

fn default_memory() -> String {
    "256m".to_string()
}

fn default_cpu() -> f64 {
    1.0
}

fn default_workspace() -> String {
    "/workspace".to_string()
}

fn default_true() -> bool {
    true
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(2)
}

/// Parse a memory limit string (e.g., "512m", "1g") to bytes
pub fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.trim().to_lowercase();
    let (num_str, unit) = if limit.ends_with('g') || limit.ends_with("gb") {
        (limit.trim_end_matches(|c| c == 'g' || c == 'b'), "g")
    } else if limit.ends_with('m') || limit.ends_with("mb") {
        (limit.trim_end_matches(|c| c == 'm' || c == 'b'), "m")
    } else if limit.ends_with('k') || limit.ends_with("kb") {
        (limit.trim_end_matches(|c| c == 'k' || c == 'b'), "k")
    } else {
        (limit.as_str(), "b")
    };

    let num: i64 = num_str.parse().ok()?;

    let scale: i64 = match unit {
        "g" => 1024 * 1024 * 1024,
        "m" => 1024 * 1024,
        "k" => 1024,
        _ => 1,
    };
    num.checked_mul(scale)
}

/// How a submission is compiled and run inside a sandbox.
///
/// Commands come from the operator, never from a submission, and are handed
/// to `sh -c` as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// File name the source is written to inside the workspace
    #[serde(default = "default_source_file")]
    pub source_file: String,
    /// Compile command
    #[serde(default = "default_compile_command")]
    pub compile_command: String,
    /// Run command
    #[serde(default = "default_run_command")]
    pub run_command: String,
    /// File name stdin is written to inside the workspace
    #[serde(default = "default_stdin_file")]
    pub stdin_file: String,
    /// Stderr fragments that mean the program ran out of memory
    #[serde(default = "default_memory_markers")]
    pub memory_markers: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            source_file: default_source_file(),
            compile_command: default_compile_command(),
            run_command: default_run_command(),
            stdin_file: default_stdin_file(),
            memory_markers: default_memory_markers(),
        }
    }
}

fn default_source_file() -> String {
    "Main.java".to_string()
}

fn default_compile_command() -> String {
    "javac -encoding UTF-8 -d /workspace /workspace/Main.java".to_string()
}

fn default_run_command() -> String {
    "java -cp /workspace Main".to_string()
}

fn default_stdin_file() -> String {
    "input.txt".to_string()
}

fn default_memory_markers() -> Vec<String> {
    vec!["java.lang.OutOfMemoryError".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1024k"), Some(1024 * 1024));
        assert_eq!(parse_memory_limit("256MB"), Some(256 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1024"), Some(1024));
        assert_eq!(parse_memory_limit("lots"), None);
        assert_eq!(parse_memory_limit("9223372036854775807g"), None);
        assert_eq!(parse_memory_limit("99999999999m"), Some(99_999_999_999 * 1024 * 1024));
    }

    #[test]
    fn test_container_config_default() {
        let config = ContainerConfig::default();
        assert_eq!(config.image, "openjdk:8-jdk-alpine");
        assert_eq!(config.memory_bytes(), Some(256 * 1024 * 1024));
        assert_eq!(config.nano_cpus(), 1_000_000_000);
        assert_eq!(config.workspace, "/workspace");
    }

    #[test]
    fn test_partial_toolchain_uses_defaults() {
        let toolchain: ToolchainConfig =
            serde_json::from_str(r#"{ "run_command": "java -Xmx64m -cp /workspace Main" }"#)
                .unwrap();
        assert_eq!(toolchain.run_command, "java -Xmx64m -cp /workspace Main");
        assert_eq!(toolchain.source_file, "Main.java");
        assert_eq!(toolchain.stdin_file, "input.txt");
    }
}
