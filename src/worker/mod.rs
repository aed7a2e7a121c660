//! Reference worker
//!
//! Hosts tablet replicas in memory and answers checksum requests from the
//! coordinator:
//! - `POST /api/check_consistency` computes a replica checksum at a version
//! - `PUT /api/tablets/:tablet_id` loads (or replaces) a replica

pub mod http;
pub mod server;
pub mod store;

pub use server::WorkerServer;
pub use store::{ReplicaData, ReplicaStore, Row};
