//! Sandpool CLI
//!
//! Command-line interface for running submissions and managing the sandbox pool.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use sandpool::config::{
    apply_env_overrides, config_path, load_config, load_config_from_path, save_config, Config,
};
use sandpool::pipeline::ExecutionPipeline;
use sandpool::pool::SandboxPool;
use sandpool::sandbox::connect_runtime;
use sandpool::types::ExecutionRequest;
use sandpool::VERSION;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "sandpool",
    version = VERSION,
    about = "Sandpool - pooled Docker sandboxes for compiling and running untrusted code",
    long_about = None
)]
struct Cli {
    /// Configuration file (JSON5 or TOML)
    #[arg(long, short, global = true, env = "SANDPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run one source file, printing the result as JSON
    Run {
        /// Source file to submit
        source: PathBuf,
        /// File fed to the program's standard input
        #[arg(long)]
        stdin: Option<PathBuf>,
        /// Submission id to report
        #[arg(long, default_value = "cli")]
        id: String,
    },

    /// Show pool health and the sandboxes the runtime reports for one instance
    Status {
        /// Instance whose sandboxes to report
        #[arg(long)]
        instance: Option<String>,
        /// Print JSON instead of a summary line
        #[arg(long)]
        json: bool,
    },

    /// Warm up the pool and hold it until interrupted
    Warmup,

    /// Remove exited or dead sandboxes of one instance
    Purge {
        /// Instance whose sandboxes to inspect
        #[arg(long)]
        instance: Option<String>,
    },

    /// Write a configuration file with every default filled in
    InitConfig {
        /// Where to write it (defaults to the standard config path)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run { source, stdin, id } => {
            run_file(&load(cli.config.as_deref())?, &source, stdin.as_deref(), id).await
        }
        Commands::Status { instance, json } => {
            show_status(load(cli.config.as_deref())?, instance, json).await
        }
        Commands::Warmup => warmup(&load(cli.config.as_deref())?).await,
        Commands::Purge { instance } => purge(load(cli.config.as_deref())?, instance).await,
        Commands::InitConfig { path, force } => init_config(path, force),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sandpool=info".into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = load_config_from_path(path)?;
            apply_env_overrides(&mut config);
            config
        }
        None => load_config()?,
    };
    Ok(config)
}

async fn run_file(
    config: &Config,
    source: &Path,
    stdin: Option<&Path>,
    id: String,
) -> anyhow::Result<()> {
    let code = std::fs::read_to_string(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let mut request = ExecutionRequest::new(id, code);
    if let Some(stdin) = stdin {
        let input = std::fs::read_to_string(stdin)
            .with_context(|| format!("Failed to read {}", stdin.display()))?;
        request = request.with_stdin(input);
    }

    let runtime = connect_runtime(config).await?;
    let pipeline = ExecutionPipeline::start(runtime, config).await?;

    let result = pipeline.submit(request).await;
    pipeline.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Pin the pool to an existing instance; a fresh id would own nothing
fn require_instance(config: &mut Config, instance: Option<String>) -> anyhow::Result<()> {
    if instance.is_some() {
        config.pool.instance_id = instance;
    }
    if config.pool.instance_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        bail!("No instance id: pass --instance or set SANDPOOL_INSTANCE_ID");
    }
    Ok(())
}

async fn show_status(mut config: Config, instance: Option<String>, json: bool) -> anyhow::Result<()> {
    require_instance(&mut config, instance)?;

    let runtime = connect_runtime(&config).await?;
    let pool = SandboxPool::new(runtime.clone(), &config)?;
    let status = pool.status().await;
    let listed = runtime.list_sandboxes(pool.prefix()).await?;

    if json {
        let report = serde_json::json!({
            "instanceId": pool.instance_id(),
            "pool": status,
            "sandboxes": listed,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("instance {}: {}", pool.instance_id(), status);
    for info in &listed {
        println!(
            "  {:<40} {}",
            info.name,
            info.state.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn warmup(config: &Config) -> anyhow::Result<()> {
    let runtime = connect_runtime(config).await?;
    let pool = SandboxPool::new(runtime, config)?;
    pool.init().await?;
    println!("instance {}: {}", pool.instance_id(), pool.status().await);

    info!("Holding pool; press Ctrl-C to shut down");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    pool.shutdown().await?;
    Ok(())
}

async fn purge(mut config: Config, instance: Option<String>) -> anyhow::Result<()> {
    require_instance(&mut config, instance)?;

    let runtime = connect_runtime(&config).await?;
    let pool = SandboxPool::new(runtime, &config)?;
    let purged = pool.purge_abnormal().await?;

    if purged.is_empty() {
        println!("No abnormal sandboxes under {}", pool.prefix());
    } else {
        for name in &purged {
            println!("removed {}", name);
        }
    }
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(config_path);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    save_config(&Config::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_purge_need_an_instance() {
        let mut config = Config::default();
        config.pool.instance_id = None;
        assert!(require_instance(&mut config, None).is_err());
        assert!(require_instance(&mut config, Some("  ".to_string())).is_err());

        require_instance(&mut config, Some("judge-7".to_string())).unwrap();
        assert_eq!(config.pool.instance_id.as_deref(), Some("judge-7"));

        // A configured id is kept when the flag is absent
        require_instance(&mut config, None).unwrap();
        assert_eq!(config.pool.instance_id.as_deref(), Some("judge-7"));
    }
}
