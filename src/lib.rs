//! # Sandpool
//!
//! Pooled, network-less Docker sandboxes for compiling and running untrusted
//! code.
//!
//! ## Features
//!
//! - **Warm Pool:** Sandboxes are created ahead of demand and reused across submissions
//! - **Bounded Everything:** Pool size, wait times, per-step timeouts and captured output
//! - **Injection-Safe Transfer:** Source and stdin reach the sandbox base64 encoded
//! - **Backpressure:** A full backlog runs work on the submitter instead of dropping it
//! - **Exactly One Verdict:** Every submission resolves to a single result

pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod sandbox;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::ExecutionPipeline;
pub use pool::{Lease, SandboxPool};
pub use types::{ExecutionRequest, ExecutionResult, PoolStatus, Verdict};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
