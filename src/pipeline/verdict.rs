//! Verdict classification
//!
//! Maps what the steps produced onto exactly one [`Verdict`].

use std::time::Duration;

use crate::error::Error;
use crate::sandbox::CommandOutput;
use crate::types::{ExecutionResult, Verdict};

/// Exit status of a process killed by SIGKILL, which is how the kernel OOM killer ends it
const SIGKILL_EXIT: i64 = 137;

/// What the step driver got to before stopping
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Compilation reported diagnostics; nothing was run
    CompileFailed(CommandOutput),
    /// The program ran to completion
    Ran { output: CommandOutput, elapsed: Duration },
}

/// Whether a compile step failed
///
/// A nonzero exit or any diagnostics on stderr fail it, warnings included.
/// Without an exit status stdout counts as diagnostics too.
pub(crate) fn compile_failed(output: &CommandOutput) -> bool {
    if !output.stderr.trim().is_empty() {
        return true;
    }
    match output.exit_code {
        Some(code) => code != 0,
        None => !output.stdout.trim().is_empty(),
    }
}

/// Verdict for a completed run
pub(crate) fn run_verdict(output: &CommandOutput, memory_markers: &[String]) -> Verdict {
    let out_of_memory = || {
        output.exit_code == Some(SIGKILL_EXIT)
            || memory_markers
                .iter()
                .any(|marker| !marker.is_empty() && output.stderr.contains(marker.as_str()))
    };

    match output.exit_code {
        Some(0) => Verdict::Accepted,
        Some(_) if out_of_memory() => Verdict::MemoryLimitExceeded,
        Some(_) => Verdict::RuntimeError,
        None if out_of_memory() => Verdict::MemoryLimitExceeded,
        // Output without an exit status may be cut short; never grade it
        None => Verdict::InternalError,
    }
}

fn exit_code(output: &CommandOutput) -> i32 {
    output
        .exit_code
        .and_then(|code| i32::try_from(code).ok())
        .unwrap_or(-1)
}

/// Build the result for one submission
///
/// `total` is the time since the request was picked up; it stands in for the
/// run time whenever the run step did not complete.
pub(crate) fn into_result(
    submission_id: &str,
    outcome: Result<Outcome, Error>,
    memory_markers: &[String],
    total: Duration,
) -> ExecutionResult {
    match outcome {
        Ok(Outcome::CompileFailed(output)) => {
            // Diagnostics belong in stderr even when the compiler wrote them to stdout
            let stderr = if output.stderr.trim().is_empty() {
                output.combined_output()
            } else {
                output.stderr.clone()
            };
            ExecutionResult::new(
                submission_id,
                Verdict::CompileError,
                output.stdout.clone(),
                stderr,
                exit_code(&output),
                total,
            )
        }
        Ok(Outcome::Ran { output, elapsed }) => {
            let verdict = run_verdict(&output, memory_markers);
            let code = exit_code(&output);
            ExecutionResult::new(submission_id, verdict, output.stdout, output.stderr, code, elapsed)
        }
        Err(e) if e.is_timeout() => ExecutionResult::new(
            submission_id,
            Verdict::TimeLimitExceeded,
            String::new(),
            e.to_string(),
            -1,
            total,
        ),
        Err(e) => ExecutionResult::new(
            submission_id,
            Verdict::InternalError,
            String::new(),
            e.to_string(),
            -1,
            total,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> Vec<String> {
        vec!["java.lang.OutOfMemoryError".to_string()]
    }

    #[test]
    fn test_compile_failure_detection() {
        assert!(!compile_failed(&CommandOutput::new("", "", 0)));
        assert!(!compile_failed(&CommandOutput::new("compiled\n", "  \n", 0)));
        assert!(compile_failed(&CommandOutput::new("", "", 1)));

        let unknown = CommandOutput {
            stderr: "Main.java:1: error".to_string(),
            ..Default::default()
        };
        assert!(compile_failed(&unknown));
        assert!(!compile_failed(&CommandOutput::default()));
    }

    #[test]
    fn test_compiler_warnings_fail_the_compile() {
        let output = CommandOutput::new("", "Main.java:3: warning: [unchecked] unchecked call", 0);
        assert!(compile_failed(&output));

        let result = into_result("s-1", Ok(Outcome::CompileFailed(output)), &markers(), Duration::ZERO);
        assert_eq!(result.status, Verdict::CompileError);
        assert!(result.stderr.contains("unchecked call"));
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn test_missing_exit_status_is_never_accepted() {
        let m = markers();
        let partial = CommandOutput {
            stdout: "partial out".to_string(),
            ..Default::default()
        };
        assert_eq!(run_verdict(&partial, &m), Verdict::InternalError);

        let oom = CommandOutput {
            stderr: "java.lang.OutOfMemoryError".to_string(),
            ..Default::default()
        };
        assert_eq!(run_verdict(&oom, &m), Verdict::MemoryLimitExceeded);

        let result = into_result(
            "s-1",
            Ok(Outcome::Ran { output: partial, elapsed: Duration::from_millis(5) }),
            &m,
            Duration::from_millis(9),
        );
        assert_eq!(result.status, Verdict::InternalError);
        assert_eq!(result.exit_code, -1);
    }

    #[test]
    fn test_run_verdicts() {
        let m = markers();
        assert_eq!(run_verdict(&CommandOutput::new("42\n", "", 0), &m), Verdict::Accepted);
        assert_eq!(run_verdict(&CommandOutput::new("", "boom", 1), &m), Verdict::RuntimeError);
        assert_eq!(run_verdict(&CommandOutput::new("", "", 137), &m), Verdict::MemoryLimitExceeded);
        assert_eq!(
            run_verdict(
                &CommandOutput::new("", "Exception in thread \"main\" java.lang.OutOfMemoryError", 1),
                &m
            ),
            Verdict::MemoryLimitExceeded
        );
    }

    #[test]
    fn test_timeout_maps_to_tle() {
        let err = Error::StepTimeout {
            step: "run".to_string(),
            limit: Duration::from_secs(2),
        };
        let result = into_result("s-1", Err(err), &markers(), Duration::from_millis(2100));
        assert_eq!(result.status, Verdict::TimeLimitExceeded);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.duration_ms, 2100);
    }

    #[test]
    fn test_other_errors_map_to_internal() {
        let err = Error::SandboxNotFound("judge-pool-a-1".to_string());
        let result = into_result("s-1", Err(err), &markers(), Duration::ZERO);
        assert_eq!(result.status, Verdict::InternalError);
        assert!(result.stderr.contains("judge-pool-a-1"));
    }

    #[test]
    fn test_compile_diagnostics_land_in_stderr() {
        let outcome = Outcome::CompileFailed(CommandOutput::new("Main.java:3: error: ';' expected", "", 1));
        let result = into_result("s-1", Ok(outcome), &markers(), Duration::ZERO);
        assert_eq!(result.status, Verdict::CompileError);
        assert!(result.stderr.contains("';' expected"));
        assert_eq!(result.exit_code, 1);
    }
}
