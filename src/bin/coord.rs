//! Coordinator binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tabletd::common::{parse_duration, Config};
use tabletd::Coordinator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tabletd-coord")]
#[command(about = "tabletd coordinator: membership and replica consistency checks")]
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
    /// Start coordinator server
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for the admin API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Catalog JSON file
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Per-attempt task timeout (e.g. "5s", "500ms")
        #[arg(long)]
        task_timeout: Option<String>,

        /// Retries after a retriable transport failure
        #[arg(long)]
        max_retries: Option<u32>,

        /// Cap on concurrently running agent tasks
        #[arg(long)]
        max_in_flight: Option<usize>,

        /// Background check period (e.g. "10s")
        #[arg(long)]
        check_interval: Option<String>,

        /// Only run checks on demand
        #[arg(long)]
        no_scheduler: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
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
        Commands::Serve {
            id,
            bind,
            catalog,
            task_timeout,
            max_retries,
            max_in_flight,
            check_interval,
            no_scheduler,
        } => {
            let coord = &mut config.coordinator;
            if let Some(bind) = bind {
                coord.bind_addr = bind;
            }
            if catalog.is_some() {
                coord.catalog_path = catalog;
            }
            if let Some(timeout) = task_timeout {
                coord.task_timeout_ms = parse_duration(&timeout)?.as_millis() as u64;
            }
            if let Some(retries) = max_retries {
                coord.max_retries = retries;
            }
            if let Some(max_in_flight) = max_in_flight {
                coord.max_in_flight_tasks = max_in_flight;
            }
            if let Some(interval) = check_interval {
                coord.check_interval_ms = parse_duration(&interval)?.as_millis() as u64;
            }
            if no_scheduler {
                coord.scheduler_enabled = false;
            }
            config.validate()?;

            let node_id = id.unwrap_or(config.node_id);
            Coordinator::new(config.coordinator, node_id).serve().await?;
        }
    }

    Ok(())
}
