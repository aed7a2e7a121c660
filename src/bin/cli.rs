//! CLI for cluster administration

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;
use tabletd::common::RestClient;
use tabletd::coordinator::{AlterClause, BrokerOp, NodeRole};

#[derive(Parser)]
#[command(name = "tabletd")]
#[command(about = "tabletd cluster administration CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:8030")]
    coordinator: String,

    /// Request timeout in seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Coordinator health and counters
    Status,

    /// List nodes
    Nodes {
        /// Only nodes of this role (backend, compute, frontend, broker)
        #[arg(long)]
        role: Option<NodeRole>,
    },

    /// Show one node
    Node { id: u64 },

    /// Add nodes (ALTER SYSTEM ADD ...)
    AddNodes {
        role: NodeRole,
        #[arg(required = true)]
        host_ports: Vec<String>,
    },

    /// Drop nodes (ALTER SYSTEM DROP ...)
    DropNodes {
        role: NodeRole,
        #[arg(required = true)]
        host_ports: Vec<String>,
    },

    /// Move every node of a role from one host to another
    ModifyHost {
        role: NodeRole,
        src_host: String,
        dest_host: String,
    },

    /// Add brokers under a name
    AddBrokers {
        name: String,
        #[arg(required = true)]
        host_ports: Vec<String>,
    },

    /// Drop brokers; drops every broker of the name when no address is given
    DropBrokers { name: String, host_ports: Vec<String> },

    /// Override a node's state (alive, dead, decommissioning)
    SetState { id: u64, state: String },

    /// Check replica consistency of one tablet
    CheckTablet {
        tablet_id: u64,
        #[arg(long)]
        version: u64,
        /// Overall deadline in milliseconds
        #[arg(long)]
        deadline_ms: Option<u64>,
    },

    /// Check every tablet of a table
    CheckTable {
        table_id: u64,
        #[arg(long)]
        version: u64,
    },

    /// Recent check reports
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        tablet: Option<u64>,
    },
}

async fn send_json(request: reqwest::RequestBuilder) -> anyhow::Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("request failed");
        anyhow::bail!("{} ({})", message, status);
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let base = cli.coordinator.trim_end_matches('/').to_string();
    let timeout = Duration::from_secs(cli.timeout);
    let rest = RestClient::new(timeout)?;
    let http = reqwest::Client::builder().timeout(timeout).build()?;

    let get = |path: String| {
        let url = format!("{}{}", base, path);
        let rest = &rest;
        async move {
            let body = rest.http_get(&url).await?;
            Ok::<Value, anyhow::Error>(serde_json::from_str(&body)?)
        }
    };
    let alter = |clause: AlterClause| {
        http.post(format!("{}/admin/system", base)).json(&clause)
    };

    let output = match cli.command {
        Commands::Status => get("/health".into()).await?,
        Commands::Nodes { role } => match role {
            Some(role) => get(format!("/admin/nodes?role={}", role)).await?,
            None => get("/admin/nodes".into()).await?,
        },
        Commands::Node { id } => get(format!("/admin/nodes/{}", id)).await?,
        Commands::AddNodes { role, host_ports } => {
            send_json(alter(AlterClause::AddNodes { role, host_ports })).await?
        }
        Commands::DropNodes { role, host_ports } => {
            send_json(alter(AlterClause::DropNodes { role, host_ports })).await?
        }
        Commands::ModifyHost {
            role,
            src_host,
            dest_host,
        } => {
            send_json(alter(AlterClause::ModifyHost {
                role,
                src_host,
                dest_host,
            }))
            .await?
        }
        Commands::AddBrokers { name, host_ports } => {
            send_json(alter(AlterClause::ModifyBroker {
                name,
                op: BrokerOp::Add { host_ports },
            }))
            .await?
        }
        Commands::DropBrokers { name, host_ports } => {
            let op = if host_ports.is_empty() {
                BrokerOp::DropAll
            } else {
                BrokerOp::Drop { host_ports }
            };
            send_json(alter(AlterClause::ModifyBroker { name, op })).await?
        }
        Commands::SetState { id, state } => {
            send_json(
                http.put(format!("{}/admin/nodes/{}/state", base, id))
                    .json(&json!({ "state": state })),
            )
            .await?
        }
        Commands::CheckTablet {
            tablet_id,
            version,
            deadline_ms,
        } => {
            let report = send_json(
                http.post(format!("{}/admin/consistency/tablets/{}", base, tablet_id))
                    .json(&json!({ "version": version, "deadline_ms": deadline_ms })),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let status = report["status"].as_str().unwrap_or("unknown");
            if status != "consistent" {
                anyhow::bail!("tablet {} is {} at version {}", tablet_id, status, version);
            }
            return Ok(());
        }
        Commands::CheckTable { table_id, version } => {
            send_json(
                http.post(format!("{}/admin/consistency/tables/{}", base, table_id))
                    .json(&json!({ "version": version })),
            )
            .await?
        }
        Commands::History { limit, tablet } => {
            let mut path = format!("/admin/consistency/history?limit={}", limit);
            if let Some(tablet) = tablet {
                path.push_str(&format!("&tablet_id={}", tablet));
            }
            get(path).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
