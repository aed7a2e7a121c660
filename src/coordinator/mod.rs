//! Coordinator implementation
//!
//! The coordinator is responsible for:
//! - Cluster membership (add/drop/migrate nodes, brokers)
//! - Resolving node addresses for outbound agent tasks
//! - Dispatching per-replica tasks with bounded concurrency and retries
//! - Serving the admin HTTP API

pub mod agent_client;
pub mod catalog;
pub mod clause;
pub mod dispatcher;
pub mod http;
pub mod registry;
pub mod retry;
pub mod server;

pub use agent_client::{AgentClient, ConsistencyAgent, HttpAgentClient};
pub use catalog::{InMemoryCatalog, StorageCatalog};
pub use clause::{AlterClause, BrokerOp};
pub use dispatcher::{TaskDispatcher, TaskError};
pub use registry::{AddressBook, Node, NodeAddress, NodeId, NodeRegistry, NodeRole};
pub use server::{Coordinator, CoordinatorContext};
