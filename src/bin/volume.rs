use anyhow::Result;
use clap::{Parser, Subcommand};
use minifs::{common::Config, VolumeServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minifs-volume")]
#[command(about = "minifs storage node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Join the coordinator and serve file data
    Serve {
        /// Data port to listen on and announce (0 picks a free port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Coordinator address
        #[arg(short, long)]
        coordinator: Option<SocketAddr>,

        /// Data directory (emptied on start)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Upload timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let Commands::Serve {
        port,
        coordinator,
        data,
        timeout,
        log_level,
    } = cli.command;

    // Initialize tracing
    let log_level = log_level.unwrap_or_else(|| config.log_level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut volume_config = config.volume.unwrap_or_default();
    if let Some(port) = port {
        volume_config.bind_addr.set_port(port);
    }
    if let Some(coordinator) = coordinator {
        volume_config.coordinator_addr = coordinator;
    }
    if let Some(data) = data {
        volume_config.data_dir = data;
    }
    if let Some(timeout) = timeout {
        volume_config.timeout_ms = timeout;
    }

    let server = VolumeServer::bind(volume_config).await?;
    server.serve().await?;

    Ok(())
}
