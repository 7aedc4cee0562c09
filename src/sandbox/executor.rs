//! Command executor
//!
//! Every command issued inside a sandbox goes through [`CommandExecutor::run`]:
//! asynchronous, stdout/stderr captured, bounded in time. Exceeding the bound
//! is reported as [`Error::StepTimeout`], never as partial output.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sandbox::runtime::{CommandOutput, SandboxRuntime};

/// Suffix appended to captured output that hit the size cap
pub const TRUNCATION_MARKER: &str = "…[truncated]";

/// What a command is for; used in logs and timeout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Probe,
    Cleanup,
    Write,
    Compile,
    Run,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Probe => write!(f, "probe"),
            Step::Cleanup => write!(f, "cleanup"),
            Step::Write => write!(f, "write"),
            Step::Compile => write!(f, "compile"),
            Step::Run => write!(f, "run"),
        }
    }
}

/// Bounded-time command runner shared by the pool and the pipeline
#[derive(Clone)]
pub struct CommandExecutor {
    runtime: Arc<dyn SandboxRuntime>,
    max_output_bytes: usize,
}

impl CommandExecutor {
    /// Create a new executor over a runtime
    pub fn new(runtime: Arc<dyn SandboxRuntime>, max_output_bytes: usize) -> Self {
        CommandExecutor {
            runtime,
            max_output_bytes,
        }
    }

    /// The underlying runtime
    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    /// Run `argv` inside `sandbox`, giving up after `timeout`
    ///
    /// A command that times out may keep running inside the sandbox.
    pub async fn run(
        &self,
        sandbox: &str,
        step: Step,
        argv: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        debug!(sandbox, %step, "exec {:?}", argv.first());

        match tokio::time::timeout(timeout, self.runtime.exec(sandbox, argv)).await {
            Ok(Ok(mut output)) => {
                cap_output(&mut output.stdout, self.max_output_bytes);
                cap_output(&mut output.stderr, self.max_output_bytes);
                Ok(output)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(sandbox, %step, "command timed out after {:?}", timeout);
                Err(Error::StepTimeout {
                    step: step.to_string(),
                    limit: timeout,
                })
            }
        }
    }

    /// Run `script` through `sh -c`
    pub async fn shell(
        &self,
        sandbox: &str,
        step: Step,
        script: impl Into<String>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let argv = crate::sandbox::shell::sh(script);
        self.run(sandbox, step, &argv, timeout).await
    }
}

/// Cut `text` to at most `limit` bytes on a char boundary, marking the cut
pub fn cap_output(text: &mut String, limit: usize) {
    if text.len() <= limit {
        return;
    }
    // Already cut by the runtime
    if text.ends_with(TRUNCATION_MARKER) && text.len() - TRUNCATION_MARKER.len() <= limit {
        return;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str(TRUNCATION_MARKER);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::fake::FakeRuntime;

    #[test]
    fn test_cap_output() {
        let mut short = "hello".to_string();
        cap_output(&mut short, 10);
        assert_eq!(short, "hello");

        let mut long = "héllo wörld".to_string();
        cap_output(&mut long, 2);
        assert_eq!(long, format!("h{}", TRUNCATION_MARKER));
    }

    #[tokio::test]
    async fn test_run_captures_streams() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_running("judge-pool-t-1");
        let executor = CommandExecutor::new(runtime.clone(), 1024);

        let output = executor
            .shell("judge-pool-t-1", Step::Probe, "test -d /workspace && echo OK", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "OK");
        assert!(output.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinguishable() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_running("judge-pool-t-1");
        runtime.set_exec_delay(Duration::from_secs(60));
        let executor = CommandExecutor::new(runtime, 1024);

        let err = executor
            .shell("judge-pool-t-1", Step::Compile, "javac Main.java", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("compile step"));
    }

    #[tokio::test]
    async fn test_missing_sandbox_propagates() {
        let runtime = Arc::new(FakeRuntime::new());
        let executor = CommandExecutor::new(runtime, 1024);

        let err = executor
            .shell("judge-pool-t-9", Step::Probe, "true", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SandboxNotFound(_)));
    }
}
