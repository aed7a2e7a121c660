//! Common utilities and types shared across tabletd

pub mod config;
pub mod error;
pub mod host;
pub mod rest_client;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinatorConfig, WorkerConfig};
pub use error::{Error, Result};
pub use host::{
    is_ipv4_literal, validate_host_migration, validate_host_port, HostResolver, StaticResolver,
    SystemResolver,
};
pub use rest_client::RestClient;
pub use utils::{parse_duration, timestamp_now_millis, NodeState};
