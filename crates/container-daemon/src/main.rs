//! Container orchestrator daemon
//!
//! Serves the orchestrator over WebSocket and runs the reaper.

use anyhow::Result;
use clap::Parser;
use container_daemon::DaemonConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "container-daemon")]
#[command(about = "Per-project container lifecycle daemon", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Data directory for durable state, overrides the config file
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `container_orchestration=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Keep records in memory only
    #[arg(long)]
    ephemeral: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::new(&args.log_level))
        .init();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = Some(data_dir);
    }

    info!("Starting container daemon on {}", config.listen);
    if !args.ephemeral {
        let data_dir = config.data_dir();
        info!("Data directory: {}", data_dir.display());
        std::fs::create_dir_all(&data_dir)?;
    }

    smol::block_on(container_daemon::run(config, args.ephemeral))
}
