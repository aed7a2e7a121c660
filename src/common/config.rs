//! Configuration for tabletd components
//!
//! Values come from an optional TOML file layered under `TABLETD__*`
//! environment variables (e.g. `TABLETD__COORDINATOR__MAX_RETRIES=3`).
//! Every field has a default, so an empty configuration is valid.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tabletd.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TABLETD_CONFIG";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Coordinator-specific config
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Worker-specific config
    #[serde(default)]
    pub worker: WorkerConfig,
}

fn default_node_id() -> String {
    "coord-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            log_level: default_log_level(),
            coordinator: CoordinatorConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$TABLETD_CONFIG`, falling back to `tabletd.toml`.
    /// A missing file is not an error.
    pub fn load() -> crate::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::load_from(path)
    }

    /// Load from a specific file (optional) plus the environment.
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("TABLETD")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let c = &self.coordinator;
        if c.task_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "coordinator.task_timeout_ms must be positive".into(),
            ));
        }
        if c.check_deadline_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "coordinator.check_deadline_ms must be positive".into(),
            ));
        }
        if c.max_in_flight_tasks == 0 {
            return Err(crate::Error::InvalidConfig(
                "coordinator.max_in_flight_tasks must be positive".into(),
            ));
        }
        if c.check_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "coordinator.check_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the admin HTTP API
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// JSON file describing tablets and their replicas
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,

    /// Timeout of a single consistency RPC attempt
    #[serde(default = "default_task_timeout")]
    pub task_timeout_ms: u64,

    /// Extra attempts after a retriable transport failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on one whole tablet check
    #[serde(default = "default_check_deadline")]
    pub check_deadline_ms: u64,

    /// Cluster-wide cap on concurrently running agent tasks
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_tasks: usize,

    /// Period of the background consistency scheduler
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// Set to false to only run checks on demand
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,

    /// Number of reports kept for `/admin/consistency/history`
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8030))
}
fn default_task_timeout() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_check_deadline() -> u64 {
    30_000
}
fn default_max_in_flight() -> usize {
    256
}
fn default_check_interval() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}
fn default_history_capacity() -> usize {
    1_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            catalog_path: None,
            task_timeout_ms: default_task_timeout(),
            max_retries: default_max_retries(),
            check_deadline_ms: default_check_deadline(),
            max_in_flight_tasks: default_max_in_flight(),
            check_interval_ms: default_check_interval(),
            scheduler_enabled: true,
            history_capacity: default_history_capacity(),
        }
    }
}

impl CoordinatorConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn check_deadline(&self) -> Duration {
        Duration::from_millis(self.check_deadline_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Reference worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bind address for the worker RPC endpoint
    #[serde(default = "default_worker_bind")]
    pub bind_addr: SocketAddr,

    /// JSON file with replicas to serve at startup
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

fn default_worker_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9060))
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_worker_bind(),
            data_path: None,
        }
    }
}
