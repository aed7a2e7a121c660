//! Worker server

use crate::common::{Result, WorkerConfig};
use crate::worker::http::{create_router, WorkerState};
use crate::worker::store::ReplicaStore;
use std::sync::Arc;

pub struct WorkerServer {
    config: WorkerConfig,
    worker_id: String,
}

impl WorkerServer {
    pub fn new(config: WorkerConfig, worker_id: String) -> Self {
        Self { config, worker_id }
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting worker: {}", self.worker_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);

        let store = match &self.config.data_path {
            Some(path) => {
                tracing::info!("  Data file: {}", path.display());
                ReplicaStore::from_json_file(path)?
            }
            None => ReplicaStore::new(),
        };

        let router = create_router(WorkerState {
            store: Arc::new(store),
            worker_id: self.worker_id.clone(),
        });
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("✓ Worker ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for shutdown signal: {}", e);
                }
            })
            .await?;

        tracing::info!("Worker stopped");
        Ok(())
    }
}
