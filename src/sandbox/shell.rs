//! Shell scripts issued inside sandboxes
//!
//! Untrusted bytes never reach a shell as text: they are base64 encoded on
//! this side and decoded by `base64 -d` inside the sandbox. The base64
//! alphabet contains no quote, so single-quoting the payload is enough.

use base64::{engine::general_purpose, Engine as _};

/// Encoded bytes per write command; a multiple of 4 so chunks decode independently
pub const WRITE_CHUNK_CHARS: usize = 64 * 1024;

/// Command that keeps a fresh sandbox alive with its workspace in place
pub fn keepalive_command(workspace: &str) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("mkdir -p {} && tail -f /dev/null", workspace),
    ]
}

/// Wrap a script as `sh -c <script>`
pub fn sh(script: impl Into<String>) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.into()]
}

/// Empty the workspace (dotfiles included) and recreate it
pub fn wipe_script(workspace: &str) -> String {
    format!(
        "rm -rf {ws}/* {ws}/.[!.]* {ws}/..?* 2>/dev/null; mkdir -p {ws} && chmod 755 {ws}",
        ws = workspace
    )
}

/// Print `OK` when the workspace exists
pub fn probe_script(workspace: &str) -> String {
    format!("test -d {} && echo OK", workspace)
}

/// Whether a probe's stdout means the sandbox is usable
pub fn probe_passed(stdout: &str) -> bool {
    stdout.trim() == "OK"
}

/// Scripts that write `content` to `path`, in order
///
/// The first script truncates the file, the rest append.
pub fn write_file_scripts(content: &[u8], path: &str) -> Vec<String> {
    let encoded = general_purpose::STANDARD.encode(content);
    if encoded.is_empty() {
        return vec![format!(": > {}", path)];
    }

    encoded
        .as_bytes()
        .chunks(WRITE_CHUNK_CHARS)
        .enumerate()
        .map(|(i, chunk)| {
            // base64 output is ASCII, so every chunk is valid UTF-8
            let chunk = String::from_utf8_lossy(chunk);
            let redirect = if i == 0 { ">" } else { ">>" };
            format!("printf '%s' '{}' | base64 -d {} {}", chunk, redirect, path)
        })
        .collect()
}

/// The run command, reading stdin from `stdin_path` when given
pub fn run_script(run_command: &str, stdin_path: Option<&str>) -> String {
    match stdin_path {
        Some(path) => format!("{} < {}", run_command, path),
        None => run_command.to_string(),
    }
}
