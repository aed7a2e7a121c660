//! Administrative topology-change clauses
//!
//! The command-parsing layer hands the coordinator one [`AlterClause`] per
//! statement, with host/port lists already tokenized. [`AlterClause::analyze`]
//! is the validation pass; [`NodeRegistry::apply`](super::registry::NodeRegistry::apply)
//! runs it and then performs the mutation.

use crate::common::{validate_host_port, Error, Result};
use crate::coordinator::registry::{validate_broker_name, NodeRole};
use serde::{Deserialize, Serialize};

/// One `ALTER SYSTEM` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlterClause {
    /// `ADD {BACKEND|COMPUTE NODE|FRONTEND|BROKER} host:port[,...]`
    AddNodes {
        role: NodeRole,
        host_ports: Vec<String>,
    },
    /// `DROP <role> host:port[,...]`
    DropNodes {
        role: NodeRole,
        host_ports: Vec<String>,
    },
    /// `MODIFY {BACKEND|FRONTEND} HOST src TO dest`
    ModifyHost {
        role: NodeRole,
        src_host: String,
        dest_host: String,
    },
    /// `MODIFY BROKER NAME name {ADD|DROP|DROP ALL} ...`
    ModifyBroker { name: String, op: BrokerOp },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BrokerOp {
    Add { host_ports: Vec<String> },
    Drop { host_ports: Vec<String> },
    DropAll,
}

/// Every entry must parse, and there must be at least one.
fn check_host_ports(role: &str, host_ports: &[String]) -> Result<()> {
    if host_ports.is_empty() {
        return Err(Error::EmptyAddressList);
    }
    for hp in host_ports {
        validate_host_port(hp).map_err(|e| match e {
            Error::InvalidAddress(detail) => {
                Error::InvalidAddress(format!("{} host or port is wrong! {}", role, detail))
            }
            other => other,
        })?;
    }
    Ok(())
}

impl AlterClause {
    /// Syntactic validation without touching the registry.
    ///
    /// Name resolution for host migrations is left to the registry, which
    /// owns the resolver.
    pub fn analyze(&self) -> Result<()> {
        match self {
            AlterClause::AddNodes { role, host_ports }
            | AlterClause::DropNodes { role, host_ports } => {
                if *role == NodeRole::Broker {
                    return Err(Error::InvalidClause(
                        "brokers are managed with MODIFY BROKER NAME".into(),
                    ));
                }
                check_host_ports(role.as_str(), host_ports)
            }
            AlterClause::ModifyHost {
                role,
                src_host,
                dest_host,
            } => {
                if !matches!(role, NodeRole::Backend | NodeRole::Frontend) {
                    return Err(Error::InvalidClause(format!(
                        "MODIFY HOST is not supported for {} nodes",
                        role
                    )));
                }
                if src_host.trim().is_empty() || dest_host.trim().is_empty() {
                    return Err(Error::InvalidAddress("source and destination hosts are required".into()));
                }
                Ok(())
            }
            AlterClause::ModifyBroker { name, op } => {
                validate_broker_name(name)?;
                match op {
                    BrokerOp::Add { host_ports } | BrokerOp::Drop { host_ports } => {
                        check_host_ports("broker", host_ports)
                    }
                    BrokerOp::DropAll => Ok(()),
                }
            }
        }
    }
}
