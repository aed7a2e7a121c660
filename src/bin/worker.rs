//! Reference worker binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tabletd::common::Config;
use tabletd::WorkerServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tabletd-worker")]
#[command(about = "tabletd reference worker serving replica checksums")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $TABLETD_CONFIG or ./tabletd.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start worker server
    Serve {
        /// Worker ID
        #[arg(long)]
        id: String,

        /// Bind address for the agent API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Replica JSON file loaded at startup
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { id, bind, data } => {
            if let Some(bind) = bind {
                config.worker.bind_addr = bind;
            }
            if data.is_some() {
                config.worker.data_path = data;
            }
            WorkerServer::new(config.worker, id).serve().await?;
        }
    }

    Ok(())
}
