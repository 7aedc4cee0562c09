//! Submission and verdict types shared with the queue collaborators

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Terminal classification of one execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "ACCEPTED"),
            Verdict::CompileError => write!(f, "COMPILE_ERROR"),
            Verdict::RuntimeError => write!(f, "RUNTIME_ERROR"),
            Verdict::TimeLimitExceeded => write!(f, "TIME_LIMIT_EXCEEDED"),
            Verdict::MemoryLimitExceeded => write!(f, "MEMORY_LIMIT_EXCEEDED"),
            Verdict::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Request to compile and run one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Opaque correlation key
    pub submission_id: String,
    /// Untrusted source text
    pub source_code: String,
    /// Untrusted standard input
    #[serde(default)]
    pub stdin: Option<String>,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(submission_id: impl Into<String>, source_code: impl Into<String>) -> Self {
        ExecutionRequest {
            submission_id: submission_id.into(),
            source_code: source_code.into(),
            stdin: None,
        }
    }

    /// Set stdin
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Stdin, if any was given and it is non-empty
    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref().filter(|s| !s.is_empty())
    }
}

/// Outcome of one submission; built once and never mutated afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub submission_id: String,
    pub status: Verdict,
    pub stdout: String,
    pub stderr: String,
    /// Exit status of the last step that ran; -1 when unknown
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Create a result
    pub fn new(
        submission_id: impl Into<String>,
        status: Verdict,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
        duration: Duration,
    ) -> Self {
        ExecutionResult {
            submission_id: submission_id.into(),
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create an internal error result
    pub fn internal_error(submission_id: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionResult::new(
            submission_id,
            Verdict::InternalError,
            String::new(),
            message,
            -1,
            Duration::ZERO,
        )
    }

    /// Whether the submission compiled and ran cleanly
    pub fn is_accepted(&self) -> bool {
        self.status == Verdict::Accepted
    }
}

/// Last use of one available sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentUse {
    pub name: String,
    /// Seconds since the sandbox was last returned
    pub idle_secs: u64,
}

/// Read-only snapshot of pool health for monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub available: usize,
    pub in_use: usize,
    pub total: usize,
    pub max_allowed: usize,
    pub target_size: usize,
    /// Share of `max_allowed` currently leased out, 0.0..=1.0
    pub utilization: f64,
    /// Up to five most recently used available sandboxes
    pub recent: Vec<RecentUse>,
}

impl PoolStatus {
    /// How many entries `recent` keeps
    pub const RECENT_LIMIT: usize = 5;

    pub fn new(
        available: usize,
        in_use: usize,
        total: usize,
        max_allowed: usize,
        target_size: usize,
        recent: Vec<RecentUse>,
    ) -> Self {
        let utilization = if max_allowed == 0 {
            0.0
        } else {
            in_use as f64 / max_allowed as f64
        };
        PoolStatus {
            available,
            in_use,
            total,
            max_allowed,
            target_size,
            utilization,
            recent,
        }
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "available={} in_use={} total={}/{} target={} utilization={:.0}%",
            self.available,
            self.in_use,
            self.total,
            self.max_allowed,
            self.target_size,
            self.utilization * 100.0
        )
    }
}
