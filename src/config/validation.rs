//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;
use crate::error::{Error, Result};

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }

    /// Turn collected errors into a single `Error::Config`
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            return Ok(());
        }
        let joined = self
            .errors
            .iter()
            .map(|issue| format!("{}: {}", issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::Config(joined))
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_pool_config(config, result);
    result = validate_container_config(config, result);
    result = validate_toolchain_config(config, result);
    result = validate_pipeline_config(config, result);

    result
}

fn validate_pool_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let pool = &config.pool;

    if pool.max_total == 0 {
        result = result.with_error(ValidationIssue::new(
            "pool.max_total",
            "At least one sandbox must be allowed",
        ));
    }

    if pool.target_size > pool.max_total {
        result = result.with_error(
            ValidationIssue::new(
                "pool.target_size",
                format!(
                    "Target size {} exceeds max_total {}",
                    pool.target_size, pool.max_total
                ),
            )
            .with_suggestion("Lower pool.target_size or raise pool.max_total"),
        );
    }

    if pool.acquire_attempts == 0 {
        result = result.with_error(ValidationIssue::new(
            "pool.acquire_attempts",
            "At least one acquire attempt is required",
        ));
    }

    if pool.reap_interval.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "pool.reap_interval",
            "Reap interval must be non-zero",
        ));
    }

    if pool.name_prefix.is_empty() || !is_name_safe(&pool.name_prefix) {
        result = result.with_error(ValidationIssue::new(
            "pool.name_prefix",
            "Name prefix must be non-empty and use only [A-Za-z0-9_.-]",
        ));
    }

    if let Some(id) = &pool.instance_id {
        if !id.trim().is_empty() && !is_name_safe(id.trim()) {
            result = result.with_error(ValidationIssue::new(
                "pool.instance_id",
                "Instance id may use only [A-Za-z0-9_.-]",
            ));
        }
    }

    if pool.overflow_slack == 0 {
        result = result.with_warning(
            ValidationIssue::new(
                "pool.overflow_slack",
                "No overflow slack: released sandboxes beyond the target are destroyed eagerly",
            )
            .with_suggestion("A slack of 1-2 avoids needless create/destroy churn"),
        );
    }

    if !pool.pre_use_validation && !pool.post_use_cleanup {
        result = result.with_warning(ValidationIssue::new(
            "pool",
            "Workspace cleanup is disabled on both lease boundaries; files may leak between submissions",
        ));
    }

    result
}

fn validate_container_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let container = &config.container;

    if container.image.is_empty() {
        result = result.with_error(
            ValidationIssue::new("container.image", "No image specified")
                .with_suggestion("Set container.image to a Docker image that ships the toolchain"),
        );
    }

    if container.memory_bytes().map_or(true, |bytes| bytes <= 0) {
        result = result.with_error(ValidationIssue::new(
            "container.memory_limit",
            format!("Unparsable memory limit: {}", container.memory_limit),
        ));
    }

    if container.cpu_limit <= 0.0 {
        result = result.with_error(ValidationIssue::new(
            "container.cpu_limit",
            "CPU limit must be positive",
        ));
    }

    if !container.workspace.starts_with('/') || !is_path_safe(&container.workspace) {
        result = result.with_error(ValidationIssue::new(
            "container.workspace",
            "Workspace must be an absolute path without shell metacharacters",
        ));
    }

    result
}

fn validate_toolchain_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let toolchain = &config.toolchain;

    for (path, file) in [
        ("toolchain.source_file", &toolchain.source_file),
        ("toolchain.stdin_file", &toolchain.stdin_file),
    ] {
        if file.is_empty() || file.contains('/') || !is_name_safe(file) {
            result = result.with_error(ValidationIssue::new(
                path,
                "Must be a plain file name using only [A-Za-z0-9_.-]",
            ));
        }
    }

    if toolchain.compile_command.trim().is_empty() {
        result = result.with_error(ValidationIssue::new(
            "toolchain.compile_command",
            "Compile command is empty",
        ));
    }

    if toolchain.run_command.trim().is_empty() {
        result = result.with_error(ValidationIssue::new(
            "toolchain.run_command",
            "Run command is empty",
        ));
    }

    result
}

fn validate_pipeline_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let pipeline = &config.pipeline;

    if pipeline.workers == 0 {
        result = result.with_error(ValidationIssue::new(
            "pipeline.workers",
            "At least one worker is required",
        ));
    }

    if pipeline.backlog == 0 {
        result = result.with_warning(ValidationIssue::new(
            "pipeline.backlog",
            "Zero backlog: every submission beyond the busy workers runs on the caller",
        ));
    }

    if pipeline.max_source_bytes == 0 || pipeline.max_output_bytes == 0 {
        result = result.with_error(ValidationIssue::new(
            "pipeline",
            "max_source_bytes and max_output_bytes must be positive",
        ));
    }

    result
}

fn is_name_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_path_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}
