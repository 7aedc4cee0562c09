//! Docker container runtime
//!
//! Long-lived, network-less containers that the pool lends out. Commands run
//! through `docker exec` with both streams attached.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::error::{Error, Result};
use crate::sandbox::executor::TRUNCATION_MARKER;
use crate::sandbox::runtime::{CommandOutput, SandboxInfo, SandboxRuntime, SandboxSpec};

/// Seconds the Docker client waits on a single API call
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Docker-backed sandbox runtime
pub struct DockerRuntime {
    /// Docker client
    docker: Docker,
    /// Container configuration
    config: ContainerConfig,
    /// Per-stream capture limit for exec output
    max_output_bytes: usize,
}

impl DockerRuntime {
    /// Connect to Docker and make sure the sandbox image is present
    pub async fn connect(config: &ContainerConfig, max_output_bytes: usize) -> Result<Self> {
        let docker = connect_docker(config.docker_host.as_deref())?;

        // Verify connection
        docker
            .ping()
            .await
            .map_err(|e| Error::Container(format!("Docker ping failed: {}", e)))?;

        info!(
            host = config.docker_host.as_deref().unwrap_or("local"),
            "Connected to Docker"
        );

        let runtime = DockerRuntime {
            docker,
            config: config.clone(),
            max_output_bytes,
        };

        if config.pull_image {
            runtime.ensure_image().await?;
        }

        Ok(runtime)
    }

    /// Ensure the sandbox image is available
    async fn ensure_image(&self) -> Result<()> {
        let target_image = &self.config.image;
        if self.docker.inspect_image(target_image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling Docker image: {}", target_image);

        let options = CreateImageOptions {
            from_image: target_image.clone(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(Error::Container(format!("Failed to pull image: {}", e)));
                }
            }
        }

        info!("Image pulled successfully");
        Ok(())
    }

    fn stop_grace_secs(&self) -> i64 {
        self.config.stop_grace.as_secs() as i64
    }
}

fn connect_docker(host: Option<&str>) -> Result<Docker> {
    let connected = match host {
        None => Docker::connect_with_local_defaults(),
        Some(h) if h.starts_with("unix://") => Docker::connect_with_socket(
            h.trim_start_matches("unix://"),
            CLIENT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        ),
        Some(h) => Docker::connect_with_http(h, CLIENT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION),
    };
    connected.map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))
}

/// Raw bytes of one exec stream, capped at a byte limit
///
/// Frames are kept as bytes and decoded once, so a character split across
/// two frames survives intact.
#[derive(Debug, Default)]
struct CappedStream {
    bytes: Vec<u8>,
    cut: bool,
}

impl CappedStream {
    fn push(&mut self, frame: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.bytes.len());
        if frame.len() > room {
            self.cut = true;
        }
        self.bytes.extend_from_slice(&frame[..frame.len().min(room)]);
    }

    fn finish(mut self) -> String {
        if self.cut {
            drop_split_char(&mut self.bytes);
        }
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.cut {
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Drop a trailing UTF-8 sequence the cap left incomplete
fn drop_split_char(bytes: &mut Vec<u8>) {
    let Some(back) = bytes.iter().rev().take(4).position(|b| b & 0xC0 != 0x80) else {
        return;
    };
    let start = bytes.len() - 1 - back;
    let width = match bytes[start] {
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        b if b >= 0xC0 => 2,
        _ => 1,
    };
    if start + width > bytes.len() {
        bytes.truncate(start);
    }
}

/// Docker reports names with a leading slash
fn strip_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn create_sandbox(&self, spec: &SandboxSpec) -> Result<String> {
        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            network_disabled: Some(true),
            host_config: Some(bollard::service::HostConfig {
                memory: spec.limits.memory_bytes,
                nano_cpus: Some(spec.limits.nano_cpus),
                network_mode: Some("none".to_string()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| Error::ProvisionFailed(format!("create {}: {}", spec.name, e)))?;

        for warning in &response.warnings {
            warn!(sandbox = %spec.name, "Docker warning: {}", warning);
        }

        debug!("Created container: {}", spec.name);
        Ok(response.id)
    }

    async fn start_sandbox(&self, handle: &str) -> Result<()> {
        self.docker
            .start_container(handle, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ProvisionFailed(format!("start {}: {}", handle, e)))?;
        Ok(())
    }

    async fn exec(&self, name: &str, argv: &[String]) -> Result<CommandOutput> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(self.config.workspace.clone()),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = CappedStream::default();
        let mut stderr = CappedStream::default();
        let limit = self.max_output_bytes;

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => stdout.push(&message, limit),
                        Ok(LogOutput::StdErr { message }) => stderr.push(&message, limit),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(sandbox = name, "Error reading exec output: {}", e);
                            return Err(Error::Container(format!(
                                "exec output from {} broke off: {}",
                                name, e
                            )));
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(Error::Container(format!(
                    "exec in {} started detached",
                    name
                )));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = match (inspect.running, inspect.exit_code) {
            (Some(true), _) | (_, None) => {
                return Err(Error::Container(format!(
                    "exec in {} ended its output without an exit status",
                    name
                )));
            }
            (_, Some(code)) => code,
        };

        Ok(CommandOutput {
            stdout: stdout.finish(),
            stderr: stderr.finish(),
            exit_code: Some(exit_code),
        })
    }

    async fn stop_sandbox(&self, name: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: self.stop_grace_secs(),
        };
        self.docker.stop_container(name, Some(options)).await?;
        debug!("Stopped container: {}", name);
        Ok(())
    }

    async fn remove_sandbox(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker.remove_container(name, Some(options)).await?;

        debug!("Removed container: {}", name);
        Ok(())
    }

    async fn list_sandboxes(&self, prefix: &str) -> Result<Vec<SandboxInfo>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![format!("^/{}", prefix)]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        // The daemon's name filter is a loose match; re-check the prefix here
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c.names.as_ref()?.first().map(|n| strip_name(n).to_string())?;
                name.starts_with(prefix).then(|| SandboxInfo {
                    name,
                    state: c.state.clone(),
                })
            })
            .collect())
    }
}
