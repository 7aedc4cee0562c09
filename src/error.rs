//! Error types for Sandpool

use std::time::Duration;
use thiserror::Error;

/// Result type alias using Sandpool's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Sandpool
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Docker/container error not covered by a more specific variant
    #[error("Container error: {0}")]
    Container(String),

    /// The runtime has no sandbox with this name
    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    /// The sandbox was already stopped
    #[error("Sandbox not running: {0}")]
    SandboxNotRunning(String),

    /// The runtime is already removing this sandbox
    #[error("Sandbox conflict: {0}")]
    SandboxConflict(String),

    /// No sandbox could be obtained before the wait budget ran out
    #[error("Sandbox pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The runtime rejected sandbox creation
    #[error("Sandbox provisioning failed: {0}")]
    ProvisionFailed(String),

    /// The pre-use probe failed
    #[error("Sandbox validation failed: {0}")]
    ValidationFailed(String),

    /// A command inside a sandbox exceeded its time bound
    #[error("{step} step timed out after {limit:?}")]
    StepTimeout { step: String, limit: Duration },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error means the sandbox is already gone (or going).
    ///
    /// Destroy paths treat these as success.
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Error::SandboxNotFound(_) | Error::SandboxNotRunning(_) | Error::SandboxConflict(_)
        )
    }

    /// Check if error is a step timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::StepTimeout { .. })
    }

    /// Check if error is a client error (submitter's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => Error::SandboxNotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 304,
                message,
            } => Error::SandboxNotRunning(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => Error::SandboxConflict(message),
            other => Error::Container(other.to_string()),
        }
    }
}
