//! Issue webhook service binary.
//!
//! Standalone HTTP service for GitHub issue webhook handling.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use issue_webhook::{server, Config, ProcessRunner};

/// GitHub issue webhook - discusses and implements labeled issues with Claude
#[derive(Parser)]
#[command(name = "issue-webhook")]
#[command(version)]
struct Cli {
    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Directory for repository checkouts (overrides WORKDIR)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Environment file to load before reading configuration
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env before anything reads the environment
    let env_loaded = match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
            Some(path.clone())
        }
        None => dotenvy::dotenv().ok(),
    };

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("issue_webhook=info".parse()?);
    if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    info!("Starting issue webhook service...");
    if let Some(path) = env_loaded {
        info!(path = %path.display(), "Loaded environment file");
    }

    // Load configuration
    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(workdir) = cli.workdir {
        config.workdir = workdir;
    }

    tokio::fs::create_dir_all(&config.workdir)
        .await
        .with_context(|| format!("Failed to create workdir {}", config.workdir.display()))?;

    info!(
        port = config.port,
        workdir = %config.workdir.display(),
        claude_timeout_secs = config.claude_timeout.as_secs(),
        command_timeout_secs = config.command_timeout.as_secs(),
        discuss_label = %config.discuss_label,
        implement_label = %config.implement_label,
        "Configuration loaded"
    );
    if config.claude_timeout < config.command_timeout {
        warn!("CLAUDE_TIMEOUT is shorter than COMMAND_TIMEOUT");
    }

    let state = server::AppState::new(config, Arc::new(ProcessRunner));
    server::run_server(state).await
}
