//! Cluster membership registry
//!
//! The authoritative in-memory table of cluster members. One `RwLock` guards
//! the node table and both of its indexes, so every mutation is
//! linearizable and readers always observe a complete node record.

use crate::common::{
    timestamp_now_millis, validate_host_migration, validate_host_port, Error, HostResolver,
    NodeState, Result, SystemResolver,
};
use crate::coordinator::clause::{AlterClause, BrokerOp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Registry-assigned node identifier. Never reused or rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Backend,
    Compute,
    Frontend,
    Broker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Backend => "backend",
            NodeRole::Compute => "compute",
            NodeRole::Frontend => "frontend",
            NodeRole::Broker => "broker",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "backend" | "be" => Ok(NodeRole::Backend),
            "compute" | "compute_node" | "cn" => Ok(NodeRole::Compute),
            "frontend" | "fe" => Ok(NodeRole::Frontend),
            "broker" => Ok(NodeRole::Broker),
            other => Err(Error::InvalidClause(format!("unknown node role: {}", other))),
        }
    }
}

/// A point-in-time copy of a node's network address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
    pub role: NodeRole,
    pub state: NodeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_name: Option<String>,
    pub added_at: u64,
}

impl Node {
    pub fn address(&self) -> NodeAddress {
        NodeAddress::new(self.host.clone(), self.port)
    }
}

/// Resolves a node id to the address to contact *now*.
///
/// The dispatcher calls this once per attempt, so a migration that lands
/// between attempts is picked up by the next one.
pub trait AddressBook: Send + Sync {
    fn resolve_address(&self, id: NodeId) -> Result<NodeAddress>;
}

type AddressKey = (String, u16, NodeRole);

#[derive(Default)]
struct RegistryState {
    nodes: HashMap<NodeId, Node>,
    by_address: HashMap<AddressKey, NodeId>,
    by_role: HashMap<NodeRole, BTreeSet<NodeId>>,
    next_id: u64,
}

impl RegistryState {
    fn remove(&mut self, id: NodeId) -> Option<Node> {
        let mut node = self.nodes.remove(&id)?;
        node.state = NodeState::Decommissioning;
        self.by_address
            .remove(&(node.host.clone(), node.port, node.role));
        if let Some(ids) = self.by_role.get_mut(&node.role) {
            ids.remove(&id);
        }
        Some(node)
    }

    fn id_at(&self, role: NodeRole, host: &str, port: u16) -> Option<NodeId> {
        self.by_address.get(&(host.to_string(), port, role)).copied()
    }

    fn rehost(&mut self, id: NodeId, dest_host: &str) {
        if let Some(node) = self.nodes.get_mut(&id) {
            self.by_address
                .remove(&(node.host.clone(), node.port, node.role));
            node.host = dest_host.to_string();
            self.by_address
                .insert((node.host.clone(), node.port, node.role), id);
        }
    }
}

pub struct NodeRegistry {
    state: RwLock<RegistryState>,
    resolver: Arc<dyn HostResolver>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

/// Validate a request's address list: non-empty, well formed, no repeats.
fn parse_address_list<S: AsRef<str>>(role: NodeRole, host_ports: &[S]) -> Result<Vec<(String, u16)>> {
    if host_ports.is_empty() {
        return Err(Error::EmptyAddressList);
    }
    let mut seen = HashSet::new();
    let mut pairs = Vec::with_capacity(host_ports.len());
    for hp in host_ports {
        let (host, port) = validate_host_port(hp.as_ref())?;
        if !seen.insert((host.clone(), port)) {
            return Err(Error::DuplicateNode {
                role: role.to_string(),
                host,
                port,
            });
        }
        pairs.push((host, port));
    }
    Ok(pairs)
}

impl NodeRegistry {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            resolver,
        }
    }

    /// Register nodes of `role`. Either every address is added or none is.
    pub fn add_nodes<S: AsRef<str>>(&self, role: NodeRole, host_ports: &[S]) -> Result<Vec<NodeId>> {
        let pairs = parse_address_list(role, host_ports)?;
        self.insert_all(role, None, pairs)
    }

    /// Register brokers under a broker name.
    pub fn add_brokers<S: AsRef<str>>(&self, name: &str, host_ports: &[S]) -> Result<Vec<NodeId>> {
        validate_broker_name(name)?;
        let pairs = parse_address_list(NodeRole::Broker, host_ports)?;
        self.insert_all(NodeRole::Broker, Some(name), pairs)
    }

    fn insert_all(
        &self,
        role: NodeRole,
        broker_name: Option<&str>,
        pairs: Vec<(String, u16)>,
    ) -> Result<Vec<NodeId>> {
        let mut state = self.state.write();

        if let Some((host, port)) = pairs
            .iter()
            .find(|(host, port)| state.id_at(role, host, *port).is_some())
        {
            return Err(Error::DuplicateNode {
                role: role.to_string(),
                host: host.clone(),
                port: *port,
            });
        }

        let now = timestamp_now_millis();
        let mut ids = Vec::with_capacity(pairs.len());
        for (host, port) in pairs {
            state.next_id += 1;
            let id = NodeId(state.next_id);
            tracing::info!("Adding {} node {} at {}:{}", role, id, host, port);
            state.by_address.insert((host.clone(), port, role), id);
            state.by_role.entry(role).or_default().insert(id);
            state.nodes.insert(
                id,
                Node {
                    id,
                    host,
                    port,
                    role,
                    state: NodeState::Alive,
                    broker_name: broker_name.map(str::to_string),
                    added_at: now,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    /// Decommission and remove one node.
    ///
    /// Tasks already dispatched to it hold their own copy of its address and
    /// finish (or fail) on their own.
    pub fn drop_node(&self, id: NodeId) -> Result<Node> {
        let mut state = self.state.write();
        let node = state
            .remove(id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        tracing::info!("Dropped {} node {} ({}:{})", node.role, id, node.host, node.port);
        Ok(node)
    }

    /// Drop nodes of `role` by address. All must exist.
    pub fn drop_nodes<S: AsRef<str>>(&self, role: NodeRole, host_ports: &[S]) -> Result<Vec<NodeId>> {
        let pairs = parse_address_list(role, host_ports)?;
        let mut state = self.state.write();
        let ids = pairs
            .iter()
            .map(|(host, port)| {
                state.id_at(role, host, *port).ok_or_else(|| {
                    Error::NodeNotFound(format!("{} {}:{}", role, host, port))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        for id in &ids {
            if let Some(node) = state.remove(*id) {
                tracing::info!("Dropped {} node {} ({}:{})", role, id, node.host, node.port);
            }
        }
        Ok(ids)
    }

    /// Drop the listed members of broker `name`.
    pub fn drop_brokers<S: AsRef<str>>(&self, name: &str, host_ports: &[S]) -> Result<Vec<NodeId>> {
        validate_broker_name(name)?;
        let pairs = parse_address_list(NodeRole::Broker, host_ports)?;
        let mut state = self.state.write();
        let ids = pairs
            .iter()
            .map(|(host, port)| {
                state
                    .id_at(NodeRole::Broker, host, *port)
                    .filter(|id| {
                        state.nodes.get(id).and_then(|n| n.broker_name.as_deref()) == Some(name)
                    })
                    .ok_or_else(|| {
                        Error::NodeNotFound(format!("broker {} {}:{}", name, host, port))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        for id in &ids {
            state.remove(*id);
        }
        tracing::info!("Dropped {} member(s) of broker {}", ids.len(), name);
        Ok(ids)
    }

    /// Drop every member of broker `name`.
    pub fn drop_all_brokers(&self, name: &str) -> Result<Vec<NodeId>> {
        validate_broker_name(name)?;
        let mut state = self.state.write();
        let ids: Vec<NodeId> = state
            .nodes
            .values()
            .filter(|n| n.role == NodeRole::Broker && n.broker_name.as_deref() == Some(name))
            .map(|n| n.id)
            .collect();
        if ids.is_empty() {
            return Err(Error::NodeNotFound(format!("broker {}", name)));
        }
        for id in &ids {
            state.remove(*id);
        }
        tracing::info!("Dropped all {} member(s) of broker {}", ids.len(), name);
        Ok(ids)
    }

    /// Rewrite the host of one node, keeping its id and port.
    pub fn migrate_node_host(&self, id: NodeId, dest_host: &str) -> Result<()> {
        if dest_host.trim().is_empty() {
            return Err(Error::InvalidAddress("destination host is empty".into()));
        }
        loop {
            // Name lookups happen outside the write lock.
            let src_host = self.resolve(id)?.host;
            validate_host_migration(&src_host, dest_host, self.resolver.as_ref())?;

            let mut state = self.state.write();
            let node = state
                .nodes
                .get(&id)
                .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
            if node.host != src_host {
                continue;
            }
            let (port, role) = (node.port, node.role);
            if let Some(other) = state.id_at(role, dest_host, port) {
                if other != id {
                    return Err(Error::DuplicateNode {
                        role: role.to_string(),
                        host: dest_host.to_string(),
                        port,
                    });
                }
            }
            state.rehost(id, dest_host);
            tracing::info!("Migrated {} node {} host {} -> {}", role, id, src_host, dest_host);
            return Ok(());
        }
    }

    /// Rewrite every `role` node on `src_host` to `dest_host`.
    pub fn migrate_host(&self, role: NodeRole, src_host: &str, dest_host: &str) -> Result<Vec<NodeId>> {
        validate_host_migration(src_host, dest_host, self.resolver.as_ref())?;

        let mut state = self.state.write();
        let ids: Vec<NodeId> = state
            .by_role
            .get(&role)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| state.nodes.get(id).is_some_and(|n| n.host == src_host))
            .collect();
        if ids.is_empty() {
            return Err(Error::NodeNotFound(format!("{} host {}", role, src_host)));
        }
        for id in &ids {
            let port = state.nodes[id].port;
            if state.id_at(role, dest_host, port).is_some() {
                return Err(Error::DuplicateNode {
                    role: role.to_string(),
                    host: dest_host.to_string(),
                    port,
                });
            }
        }
        for id in &ids {
            state.rehost(*id, dest_host);
        }
        tracing::info!(
            "Migrated {} {} node(s) host {} -> {}",
            ids.len(),
            role,
            src_host,
            dest_host
        );
        Ok(ids)
    }

    /// Record a liveness change (heartbeat timeout, operator action).
    pub fn set_state(&self, id: NodeId, node_state: NodeState) -> Result<()> {
        let mut state = self.state.write();
        let node = state
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
        if node.state != node_state {
            tracing::info!("Node {} state {} -> {}", id, node.state, node_state);
            node.state = node_state;
        }
        Ok(())
    }

    /// Analyze and apply one administrative clause.
    pub fn apply(&self, clause: &AlterClause) -> Result<Vec<NodeId>> {
        clause.analyze()?;
        match clause {
            AlterClause::AddNodes { role, host_ports } => {
                self.add_nodes(*role, host_ports.as_slice())
            }
            AlterClause::DropNodes { role, host_ports } => {
                self.drop_nodes(*role, host_ports.as_slice())
            }
            AlterClause::ModifyHost {
                role,
                src_host,
                dest_host,
            } => self.migrate_host(*role, src_host, dest_host),
            AlterClause::ModifyBroker { name, op } => match op {
                BrokerOp::Add { host_ports } => self.add_brokers(name, host_ports.as_slice()),
                BrokerOp::Drop { host_ports } => self.drop_brokers(name, host_ports.as_slice()),
                BrokerOp::DropAll => self.drop_all_brokers(name),
            },
        }
    }

    /// Nodes of `role`, ordered by id.
    pub fn lookup(&self, role: NodeRole) -> Vec<Node> {
        let state = self.state.read();
        state
            .by_role
            .get(&role)
            .into_iter()
            .flatten()
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    pub fn resolve(&self, id: NodeId) -> Result<Node> {
        self.state
            .read()
            .nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))
    }

    pub fn find(&self, role: NodeRole, host: &str, port: u16) -> Option<Node> {
        let state = self.state.read();
        state
            .id_at(role, host, port)
            .and_then(|id| state.nodes.get(&id).cloned())
    }

    /// Every node, ordered by id.
    pub fn all(&self) -> Vec<Node> {
        let state = self.state.read();
        let mut nodes: Vec<Node> = state.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AddressBook for NodeRegistry {
    fn resolve_address(&self, id: NodeId) -> Result<NodeAddress> {
        self.state
            .read()
            .nodes
            .get(&id)
            .map(Node::address)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))
    }
}

pub(crate) fn validate_broker_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidClause("broker name is empty".into()));
    }
    Ok(())
}
