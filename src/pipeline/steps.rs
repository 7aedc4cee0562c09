//! Per-submission step driver
//!
//! acquire → write source → compile → (write stdin) → run → classify → release

use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::config::{PipelineConfig, ToolchainConfig};
use crate::error::{Error, Result};
use crate::pool::SandboxPool;
use crate::sandbox::shell::{run_script, write_file_scripts};
use crate::sandbox::{CommandExecutor, Step};
use crate::types::{ExecutionRequest, ExecutionResult};

use super::verdict::{compile_failed, into_result, Outcome};

/// Runs submissions over sandboxes borrowed from one pool
pub(crate) struct StepRunner {
    pool: Arc<SandboxPool>,
    executor: CommandExecutor,
    toolchain: ToolchainConfig,
    config: PipelineConfig,
    workspace: String,
}

impl StepRunner {
    pub fn new(
        pool: Arc<SandboxPool>,
        toolchain: ToolchainConfig,
        config: PipelineConfig,
        workspace: String,
    ) -> Self {
        let executor = pool.executor().clone();
        StepRunner {
            pool,
            executor,
            toolchain,
            config,
            workspace,
        }
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    /// Turn one request into exactly one result
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let span = tracing::info_span!("submission", id = %request.submission_id);
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();

        if let Err(e) = self.check(&request) {
            warn!("Rejected submission: {}", e);
            return ExecutionResult::internal_error(&request.submission_id, e.to_string());
        }

        let lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("No sandbox for submission: {}", e);
                return ExecutionResult::internal_error(
                    &request.submission_id,
                    format!("No sandbox available: {}", e),
                );
            }
        };
        let sandbox = lease.name().to_string();
        debug!(sandbox = %sandbox, "Running submission");

        let outcome = self.drive(&sandbox, &request).await;
        let timed_out = matches!(&outcome, Err(e) if e.is_timeout());

        // A timed-out process may still be running inside the sandbox
        if timed_out {
            lease.destroy().await;
        } else {
            lease.release().await;
        }

        let result = into_result(
            &request.submission_id,
            outcome,
            &self.toolchain.memory_markers,
            started.elapsed(),
        );
        info!(
            sandbox = %sandbox,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Submission finished"
        );
        result
    }

    fn check(&self, request: &ExecutionRequest) -> Result<()> {
        if request.source_code.trim().is_empty() {
            return Err(Error::InvalidInput("source code is empty".to_string()));
        }
        if request.source_code.len() > self.config.max_source_bytes {
            return Err(Error::InvalidInput(format!(
                "source code is {} bytes, limit is {}",
                request.source_code.len(),
                self.config.max_source_bytes
            )));
        }
        Ok(())
    }

    async fn drive(&self, sandbox: &str, request: &ExecutionRequest) -> Result<Outcome> {
        let source_path = self.workspace_path(&self.toolchain.source_file);
        self.write_file(sandbox, &source_path, request.source_code.as_bytes())
            .await?;

        let compiled = self
            .executor
            .shell(
                sandbox,
                Step::Compile,
                self.toolchain.compile_command.as_str(),
                self.config.compile_timeout,
            )
            .await?;
        if compile_failed(&compiled) {
            debug!(sandbox, exit_code = ?compiled.exit_code, "Compilation failed");
            return Ok(Outcome::CompileFailed(compiled));
        }

        let stdin_path = match request.stdin() {
            Some(input) => {
                let path = self.workspace_path(&self.toolchain.stdin_file);
                self.write_file(sandbox, &path, input.as_bytes()).await?;
                Some(path)
            }
            None => None,
        };

        let script = run_script(&self.toolchain.run_command, stdin_path.as_deref());
        let started = Instant::now();
        let output = self
            .executor
            .shell(sandbox, Step::Run, script, self.config.run_timeout)
            .await?;

        Ok(Outcome::Ran {
            output,
            elapsed: started.elapsed(),
        })
    }

    /// Transfer untrusted bytes into the sandbox through base64
    async fn write_file(&self, sandbox: &str, path: &str, content: &[u8]) -> Result<()> {
        for script in write_file_scripts(content, path) {
            let written = self
                .executor
                .shell(sandbox, Step::Write, script, self.config.write_timeout)
                .await?;
            if !written.succeeded() {
                return Err(Error::Internal(format!(
                    "writing {} failed: {}",
                    path,
                    written.stderr.trim()
                )));
            }
        }
        Ok(())
    }

    fn workspace_path(&self, file: &str) -> String {
        format!("{}/{}", self.workspace.trim_end_matches('/'), file)
    }
}
