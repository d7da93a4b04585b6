//! CLI for the file store

use clap::{Parser, Subcommand};
use minifs::common::{format_bytes, parse_duration};
use minifs::Client;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minifs")]
#[command(about = "minifs replicated file store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator address
    #[arg(long, default_value = "127.0.0.1:12345")]
    coordinator: SocketAddr,

    /// How long to wait for each reply (e.g. 500ms, 5s)
    #[arg(long, default_value = "5s")]
    timeout: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored files
    List,

    /// Store a local file
    Store {
        /// Name to store under
        name: String,

        /// File path
        #[arg(long)]
        file: PathBuf,
    },

    /// Load a stored file
    Load {
        /// Stored name
        name: String,

        /// Output file
        #[arg(long)]
        output: PathBuf,
    },

    /// Remove a stored file
    Remove {
        /// Stored name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let timeout = parse_duration(&cli.timeout)?;
    let mut client = Client::connect(cli.coordinator, timeout).await?;

    match cli.command {
        Commands::List => {
            let files = client.list().await?;
            if files.is_empty() {
                println!("No files stored");
            }
            for file in files {
                println!("{}", file);
            }
        }

        Commands::Store { name, file } => {
            let data = tokio::fs::read(&file).await?;
            client.store(&name, &data).await?;
            println!("Stored {} ({})", name, format_bytes(data.len() as u64));
        }

        Commands::Load { name, output } => {
            let data = client.load(&name).await?;
            tokio::fs::write(&output, &data).await?;
            println!(
                "Loaded {} ({}) to {}",
                name,
                format_bytes(data.len() as u64),
                output.display()
            );
        }

        Commands::Remove { name } => {
            client.remove(&name).await?;
            println!("Removed {}", name);
        }
    }

    Ok(())
}
