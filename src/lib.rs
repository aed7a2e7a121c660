//! # tabletd
//!
//! Control plane for a replicated tablet store:
//! - Cluster membership with validated `ALTER SYSTEM` style changes
//! - Replica consistency checks fanned out to worker agents
//! - Bounded in-flight tasks, per-attempt timeouts and classified retries
//! - A periodic scheduler and an admin HTTP API
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Coordinator                │
//! │  NodeRegistry ◄── admin API (axum)      │
//! │  ConsistencyChecker ─► TaskDispatcher   │
//! └───────────┬─────────────────────────────┘
//!             │ JSON over HTTP
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Worker 1   │   │ Worker 2   │   │ Worker 3     │
//! │ replicas   │   │ replicas   │   │ replicas     │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! tabletd-coord serve \
//!   --id coord-1 \
//!   --bind 0.0.0.0:8030 \
//!   --catalog ./catalog.json
//! ```
//!
//! ### Start a worker
//! ```bash
//! tabletd-worker serve \
//!   --id worker-1 \
//!   --bind 0.0.0.0:9060 \
//!   --data ./replicas.json
//! ```
//!
//! ### Use the CLI
//! ```bash
//! tabletd add-nodes backend 10.0.0.1:9060 10.0.0.2:9060
//! tabletd nodes --role backend
//! tabletd check-tablet 10001 --version 42
//! tabletd history --limit 20
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;
pub mod worker;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use worker::WorkerServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
