//! Scripted in-memory runtime for tests
//!
//! Understands exactly the scripts the pool and the pipeline issue, plus a
//! toy toolchain (`fakec` / `fakerun`):
//!
//! - compiling fails when the source contains `SYNTAX ERROR`; a source
//!   containing `WARNING` compiles with exit 0 but prints a warning
//! - running interprets the source line by line: `print <text>`,
//!   `eprint <text>`, `echo-stdin`, `exit <n>`, `hang`, `oom`, and
//!   `disconnect`, which breaks the output stream like a lost exec attach

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ToolchainConfig;
use crate::error::{Error, Result};
use crate::sandbox::runtime::{CommandOutput, SandboxInfo, SandboxRuntime, SandboxSpec};

/// Toolchain understood by [`FakeRuntime`]
pub fn toolchain() -> ToolchainConfig {
    ToolchainConfig {
        source_file: "main.src".to_string(),
        compile_command: "fakec /workspace/main.src".to_string(),
        run_command: "fakerun /workspace/main.src".to_string(),
        stdin_file: "input.txt".to_string(),
        memory_markers: vec!["OutOfMemory".to_string()],
    }
}

#[derive(Debug, Default)]
struct FakeSandbox {
    running: bool,
    files: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct FakeRuntime {
    sandboxes: Mutex<HashMap<String, FakeSandbox>>,
    stop_calls: Mutex<HashMap<String, usize>>,
    remove_calls: Mutex<HashMap<String, usize>>,
    exec_delay: Mutex<Option<Duration>>,
    stop_delay: Mutex<Option<Duration>>,
    creates: AtomicUsize,
    compiles: AtomicUsize,
    runs: AtomicUsize,
    fail_create: AtomicBool,
    fail_probe: AtomicBool,
    fail_cleanup: AtomicBool,
    fail_remove: AtomicBool,
    closed: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running sandbox created outside the pool
    pub fn add_running(&self, name: &str) {
        let sandbox = FakeSandbox {
            running: true,
            ..Default::default()
        };
        self.sandboxes.lock().unwrap().insert(name.to_string(), sandbox);
    }

    /// Register a sandbox that has exited on its own
    pub fn add_exited(&self, name: &str) {
        self.sandboxes
            .lock()
            .unwrap()
            .insert(name.to_string(), FakeSandbox::default());
    }

    pub fn exists(&self, name: &str) -> bool {
        self.sandboxes.lock().unwrap().contains_key(name)
    }

    pub fn sandbox_count(&self) -> usize {
        self.sandboxes.lock().unwrap().len()
    }

    pub fn file(&self, name: &str, path: &str) -> Option<Vec<u8>> {
        self.sandboxes
            .lock()
            .unwrap()
            .get(name)
            .and_then(|s| s.files.get(path).cloned())
    }

    pub fn put_file(&self, name: &str, path: &str, content: &[u8]) {
        if let Some(s) = self.sandboxes.lock().unwrap().get_mut(name) {
            s.files.insert(path.to_string(), content.to_vec());
        }
    }

    pub fn stop_calls(&self, name: &str) -> usize {
        self.stop_calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn remove_calls(&self, name: &str) -> usize {
        self.remove_calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn compile_calls(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn run_calls(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_cleanup(&self, fail: bool) {
        self.fail_cleanup.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    fn with_sandbox<T>(&self, name: &str, f: impl FnOnce(&mut FakeSandbox) -> T) -> Result<T> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        match sandboxes.get_mut(name) {
            Some(s) if s.running => Ok(f(s)),
            Some(_) => Err(Error::Container(format!("{} is not running", name))),
            None => Err(Error::SandboxNotFound(name.to_string())),
        }
    }

    fn write_payload(&self, name: &str, script: &str) -> Result<CommandOutput> {
        // printf '%s' '<b64>' | base64 -d > <path>
        let rest = script.trim_start_matches("printf '%s' '");
        let (payload, tail) = rest.split_once('\'').unwrap_or((rest, ""));
        let tail = tail.trim_start_matches(" | base64 -d ");
        let (append, path) = match tail.strip_prefix(">> ") {
            Some(path) => (true, path),
            None => (false, tail.trim_start_matches("> ")),
        };
        let bytes = match general_purpose::STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(CommandOutput::new("", "base64: invalid input", 1)),
        };
        self.with_sandbox(name, |s| {
            let file = s.files.entry(path.to_string()).or_default();
            if !append {
                file.clear();
            }
            file.extend_from_slice(&bytes);
        })?;
        Ok(CommandOutput::new("", "", 0))
    }

    fn compile(&self, name: &str, path: &str) -> Result<CommandOutput> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let source = self.with_sandbox(name, |s| s.files.get(path).cloned())?;
        Ok(match source {
            None => CommandOutput::new("", format!("fakec: {}: no such file", path), 2),
            Some(src) if String::from_utf8_lossy(&src).contains("SYNTAX ERROR") => {
                CommandOutput::new("", format!("{}:1: error: syntax error", path), 1)
            }
            Some(src) if String::from_utf8_lossy(&src).contains("WARNING") => {
                CommandOutput::new("", format!("{}:1: warning: unchecked call", path), 0)
            }
            Some(_) => {
                self.with_sandbox(name, |s| {
                    s.files.insert(format!("{}.bin", path), Vec::new());
                })?;
                CommandOutput::new("", "", 0)
            }
        })
    }

    async fn run_program(&self, name: &str, command: &str) -> Result<CommandOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let (path, stdin_path) = match command.split_once(" < ") {
            Some((path, stdin)) => (path.trim(), Some(stdin.trim())),
            None => (command.trim(), None),
        };
        let (program, stdin) = self.with_sandbox(name, |s| {
            (
                s.files.get(path).cloned(),
                stdin_path.and_then(|p| s.files.get(p).cloned()),
            )
        })?;
        let program = match program {
            Some(p) => String::from_utf8_lossy(&p).to_string(),
            None => return Ok(CommandOutput::new("", "fakerun: no program", 127)),
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        for line in program.lines() {
            let line = line.trim();
            if let Some(text) = line.strip_prefix("print ") {
                stdout.push_str(text);
                stdout.push('\n');
            } else if let Some(text) = line.strip_prefix("eprint ") {
                stderr.push_str(text);
                stderr.push('\n');
            } else if line == "echo-stdin" {
                if let Some(input) = &stdin {
                    stdout.push_str(&String::from_utf8_lossy(input));
                }
            } else if let Some(code) = line.strip_prefix("exit ") {
                let code = code.parse().unwrap_or(1);
                return Ok(CommandOutput::new(stdout, stderr, code));
            } else if line == "hang" {
                std::future::pending::<()>().await;
            } else if line == "disconnect" {
                return Err(Error::Container(format!("exec output from {} broke off", name)));
            } else if line == "oom" {
                stderr.push_str("Exception: OutOfMemory\n");
                return Ok(CommandOutput::new(stdout, stderr, 137));
            }
        }
        Ok(CommandOutput::new(stdout, stderr, 0))
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<String> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::ProvisionFailed(format!("create {} refused", spec.name)));
        }
        let mut sandboxes = self.sandboxes.lock().unwrap();
        if sandboxes.contains_key(&spec.name) {
            return Err(Error::SandboxConflict(format!("{} already exists", spec.name)));
        }
        sandboxes.insert(spec.name.clone(), FakeSandbox::default());
        Ok(spec.name.clone())
    }

    async fn start_sandbox(&self, handle: &str) -> Result<()> {
        match self.sandboxes.lock().unwrap().get_mut(handle) {
            Some(s) => {
                s.running = true;
                Ok(())
            }
            None => Err(Error::SandboxNotFound(handle.to_string())),
        }
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<CommandOutput> {
        let delay = *self.exec_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let script = match argv {
            [sh, flag, script] if sh == "sh" && flag == "-c" => script.as_str(),
            _ => return Ok(CommandOutput::new("", "unsupported argv", 127)),
        };

        if script.starts_with("rm -rf ") {
            if self.fail_cleanup.load(Ordering::SeqCst) {
                return Ok(CommandOutput::new("", "rm: read-only file system", 1));
            }
            self.with_sandbox(name, |s| s.files.clear())?;
            Ok(CommandOutput::new("", "", 0))
        } else if script.starts_with("test -d ") {
            self.with_sandbox(name, |_| ())?;
            if self.fail_probe.load(Ordering::SeqCst) {
                Ok(CommandOutput::new("", "", 1))
            } else {
                Ok(CommandOutput::new("OK\n", "", 0))
            }
        } else if script.starts_with("printf '%s' '") {
            self.write_payload(name, script)
        } else if let Some(path) = script.strip_prefix(": > ") {
            self.with_sandbox(name, |s| {
                s.files.insert(path.to_string(), Vec::new());
            })?;
            Ok(CommandOutput::new("", "", 0))
        } else if let Some(path) = script.strip_prefix("fakec ") {
            self.compile(name, path.trim())
        } else if let Some(command) = script.strip_prefix("fakerun ") {
            self.run_program(name, command).await
        } else if script == "true" || script.starts_with("mkdir -p ") {
            self.with_sandbox(name, |_| ())?;
            Ok(CommandOutput::new("", "", 0))
        } else {
            Ok(CommandOutput::new("", format!("sh: {}: not found", script), 127))
        }
    }

    async fn stop_sandbox(&self, name: &str) -> Result<()> {
        *self.stop_calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        let delay = *self.stop_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.sandboxes.lock().unwrap().get_mut(name) {
            Some(s) if s.running => {
                s.running = false;
                Ok(())
            }
            Some(_) => Err(Error::SandboxNotRunning(name.to_string())),
            None => Err(Error::SandboxNotFound(name.to_string())),
        }
    }

    async fn remove_sandbox(&self, name: &str) -> Result<()> {
        *self.remove_calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::Container(format!("remove {} failed", name)));
        }
        match self.sandboxes.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::SandboxNotFound(name.to_string())),
        }
    }

    async fn list_sandboxes(&self, prefix: &str) -> Result<Vec<SandboxInfo>> {
        let sandboxes = self.sandboxes.lock().unwrap();
        let mut listed: Vec<SandboxInfo> = sandboxes
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, s)| SandboxInfo {
                name: name.clone(),
                state: Some(if s.running { "running" } else { "exited" }.to_string()),
            })
            .collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
