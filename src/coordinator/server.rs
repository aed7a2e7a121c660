//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::agent_client::{ConsistencyAgent, HttpAgentClient};
use crate::coordinator::catalog::{InMemoryCatalog, StorageCatalog};
use crate::coordinator::dispatcher::TaskDispatcher;
use crate::coordinator::http::create_router;
use crate::coordinator::registry::NodeRegistry;
use crate::ops::{CheckHistory, CheckerConfig, ConsistencyChecker, ConsistencyScheduler};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Everything the coordinator's request paths share, built once at startup
/// and passed down explicitly.
pub struct CoordinatorContext<C>
where
    C: ConsistencyAgent,
{
    pub config: CoordinatorConfig,
    pub registry: Arc<NodeRegistry>,
    pub catalog: Arc<dyn StorageCatalog>,
    pub dispatcher: Arc<TaskDispatcher<C>>,
    pub checker: Arc<ConsistencyChecker<C>>,
    pub history: Arc<CheckHistory>,
    pub started_at: Instant,
}

impl<C> CoordinatorContext<C>
where
    C: ConsistencyAgent,
{
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<NodeRegistry>,
        catalog: Arc<dyn StorageCatalog>,
        client: Arc<C>,
    ) -> Self {
        let dispatcher = Arc::new(TaskDispatcher::new(
            client,
            registry.clone(),
            config.max_in_flight_tasks,
        ));
        let checker = Arc::new(ConsistencyChecker::new(
            catalog.clone(),
            dispatcher.clone(),
            CheckerConfig::from(&config),
        ));
        let history = Arc::new(CheckHistory::new(config.history_capacity));
        Self {
            config,
            registry,
            catalog,
            dispatcher,
            checker,
            history,
            started_at: Instant::now(),
        }
    }

    pub fn scheduler(&self) -> ConsistencyScheduler<C> {
        ConsistencyScheduler::new(
            self.checker.clone(),
            self.history.clone(),
            self.config.check_interval(),
        )
    }
}

impl CoordinatorContext<HttpAgentClient> {
    /// Production wiring: OS resolver, catalog file (if any), HTTP agents.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self> {
        let catalog: Arc<dyn StorageCatalog> = match &config.catalog_path {
            Some(path) => Arc::new(InMemoryCatalog::from_json_file(path)?),
            None => Arc::new(InMemoryCatalog::new()),
        };
        let client = Arc::new(HttpAgentClient::new(config.task_timeout())?);
        Ok(Self::new(
            config,
            Arc::new(NodeRegistry::default()),
            catalog,
            client,
        ))
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  Task timeout: {:?}", self.config.task_timeout());
        tracing::info!("  Max retries: {}", self.config.max_retries);
        tracing::info!("  Max in-flight tasks: {}", self.config.max_in_flight_tasks);

        let context = Arc::new(CoordinatorContext::from_config(self.config)?);
        tracing::info!(
            "  Catalog: {} tablet(s)",
            context.catalog.tablet_ids().len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler_handle = if context.config.scheduler_enabled {
            Some(tokio::spawn(context.scheduler().run(shutdown_rx)))
        } else {
            tracing::info!("  Background consistency checks disabled");
            None
        };

        let router = create_router(context.clone());
        let listener = tokio::net::TcpListener::bind(context.config.bind_addr).await?;

        tracing::info!("✓ Coordinator ready");

        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        });
        if let Err(e) = server.await {
            tracing::error!("HTTP server error: {}", e);
        }

        let _ = shutdown_tx.send(true);
        context.dispatcher.shutdown();
        if let Some(handle) = scheduler_handle {
            if let Err(e) = handle.await {
                tracing::error!("Scheduler task failed: {}", e);
            }
        }

        tracing::info!("Coordinator stopped");
        Ok(())
    }
}
