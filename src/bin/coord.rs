//! Coordinator binary

use clap::{Parser, Subcommand};
use minifs::{common::Config, Coordinator};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minifs-coord")]
#[command(about = "minifs coordinator: file index and replica placement")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Listen port (overrides the port of the configured bind address)
        #[arg(long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,

        /// Acknowledgement timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Rebalance period in seconds
        #[arg(long)]
        rebalance_period: Option<u64>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file and environment, then override with CLI arguments
    let config = Config::load()?;

    match cli.command {
        Commands::Serve {
            port,
            bind,
            replicas,
            timeout,
            rebalance_period,
            log_level,
        } => {
            let log_level = log_level.unwrap_or_else(|| config.log_level.clone());
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| log_level.into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            let mut coord_config = config.coordinator.unwrap_or_default();
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(port) = port {
                coord_config.bind_addr.set_port(port);
            }
            if let Some(replicas) = replicas {
                coord_config.replication_factor = replicas;
            }
            if let Some(timeout) = timeout {
                coord_config.timeout_ms = timeout;
            }
            if let Some(period) = rebalance_period {
                coord_config.rebalance_period_secs = period;
            }

            let coord = Coordinator::bind(coord_config).await?;
            coord.serve().await?;
        }
    }

    Ok(())
}
