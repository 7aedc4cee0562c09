//! Sandbox runtime capability
//!
//! The pool and the pipeline only talk to sandboxes through [`SandboxRuntime`].
//! The Docker implementation lives in `container.rs`; tests use a scripted
//! in-memory runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Resource ceilings applied when a sandbox is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes
    pub memory_bytes: Option<i64>,
    /// CPU share in units of 10^-9 CPUs
    pub nano_cpus: i64,
}

/// Everything needed to create one sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Globally unique sandbox name
    pub name: String,
    /// Image the sandbox is created from
    pub image: String,
    /// Resource ceilings
    pub limits: ResourceLimits,
    /// Long-running command that keeps the sandbox alive
    pub command: Vec<String>,
}

/// A sandbox as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxInfo {
    /// Sandbox name
    pub name: String,
    /// Runtime state (`running`, `exited`, `dead`, ...)
    pub state: Option<String>,
}

impl SandboxInfo {
    /// The sandbox stopped on its own and can never serve a lease
    pub fn is_abnormal(&self) -> bool {
        matches!(self.state.as_deref(), Some("exited") | Some("dead"))
    }
}

/// Captured output of one command run inside a sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit status, when the runtime reports one
    pub exit_code: Option<i64>,
}

impl CommandOutput {
    /// Create an output with a known exit status
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        CommandOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Whether the command is known to have exited with status 0
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Capability to manage and drive isolated sandboxes
///
/// Implementations must map "no such sandbox", "already stopped" and
/// "removal already in progress" onto the dedicated error variants so that
/// destroy paths can treat them as success.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Runtime name, for logs
    fn name(&self) -> &str;

    /// Create a sandbox; returns the runtime's handle for it
    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<String>;

    /// Start a created sandbox
    async fn start_sandbox(&self, handle: &str) -> Result<()>;

    /// Run `argv` inside the named sandbox and collect its output
    async fn exec(&self, name: &str, argv: &[String]) -> Result<CommandOutput>;

    /// Stop the named sandbox
    async fn stop_sandbox(&self, name: &str) -> Result<()>;

    /// Remove the named sandbox
    async fn remove_sandbox(&self, name: &str) -> Result<()>;

    /// List sandboxes whose names start with `prefix`
    async fn list_sandboxes(&self, prefix: &str) -> Result<Vec<SandboxInfo>>;

    /// Release the client connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
