//! Agent task dispatcher
//!
//! Fans a batch of per-node requests out to the cluster and waits for every
//! one of them to reach a terminal state. Each task runs in its own tokio
//! task, so a slow or failing node never holds up its siblings. A shared
//! semaphore caps the number of calls in flight across all batches.

use crate::coordinator::agent_client::{AgentClient, TransportError, TransportErrorKind};
use crate::coordinator::registry::{AddressBook, NodeId};
use crate::coordinator::retry::should_retry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Terminal failure of one dispatched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("{error} after {attempts} attempt(s): {message}")]
    Transport {
        error: TransportErrorKind,
        message: String,
        attempts: u32,
    },
    #[error("node {node_id} is no longer registered")]
    NodeGone { node_id: NodeId },
    #[error("abandoned at the batch deadline")]
    DeadlineExceeded,
    #[error("task was cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TaskError::DeadlineExceeded
                | TaskError::Transport {
                    error: TransportErrorKind::Timeout,
                    ..
                }
        )
    }
}

pub type DispatchResults<R> = HashMap<NodeId, Result<R, TaskError>>;

pub struct TaskDispatcher<C: AgentClient> {
    client: Arc<C>,
    addresses: Arc<dyn AddressBook>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl<C: AgentClient> TaskDispatcher<C> {
    pub fn new(client: Arc<C>, addresses: Arc<dyn AddressBook>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            client,
            addresses,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Calls currently holding an admission permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Refuse new work; tasks still waiting for a permit fail as cancelled.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    /// Run every task to a terminal state.
    pub async fn dispatch(
        &self,
        tasks: Vec<(NodeId, C::Request)>,
        per_task_timeout: Duration,
        max_retries: u32,
    ) -> DispatchResults<C::Response> {
        self.dispatch_until(tasks, per_task_timeout, max_retries, None)
            .await
    }

    /// Like [`dispatch`](Self::dispatch), but tasks still running at
    /// `deadline` are aborted and reported as [`TaskError::DeadlineExceeded`].
    pub async fn dispatch_until(
        &self,
        tasks: Vec<(NodeId, C::Request)>,
        per_task_timeout: Duration,
        max_retries: u32,
        deadline: Option<Instant>,
    ) -> DispatchResults<C::Response> {
        let mut results = HashMap::with_capacity(tasks.len());
        let mut pending = HashSet::with_capacity(tasks.len());
        let mut join_set = JoinSet::new();

        for (node_id, request) in tasks {
            if !pending.insert(node_id) {
                tracing::warn!("Dropping duplicate task for node {} in one batch", node_id);
                continue;
            }
            let client = self.client.clone();
            let addresses = self.addresses.clone();
            let permits = self.permits.clone();
            join_set.spawn(async move {
                let outcome = run_task(
                    client.as_ref(),
                    addresses.as_ref(),
                    &permits,
                    node_id,
                    request,
                    per_task_timeout,
                    max_retries,
                )
                .await;
                (node_id, outcome)
            });
        }

        let collect = async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((node_id, outcome)) => {
                        pending.remove(&node_id);
                        results.insert(node_id, outcome);
                    }
                    Err(e) => tracing::error!("Agent task failed to complete: {}", e),
                }
            }
        };

        let timed_out = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, collect).await.is_err(),
            None => {
                collect.await;
                false
            }
        };

        if timed_out {
            join_set.abort_all();
            tracing::warn!(
                "Batch deadline reached with {} task(s) outstanding",
                pending.len()
            );
        }

        for node_id in pending {
            let error = if timed_out {
                TaskError::DeadlineExceeded
            } else {
                TaskError::Cancelled
            };
            results.insert(node_id, Err(error));
        }

        results
    }
}

async fn run_task<C: AgentClient>(
    client: &C,
    addresses: &dyn AddressBook,
    permits: &Semaphore,
    node_id: NodeId,
    request: C::Request,
    per_task_timeout: Duration,
    max_retries: u32,
) -> Result<C::Response, TaskError> {
    let _permit = permits.acquire().await.map_err(|_| TaskError::Cancelled)?;
    let idempotent = client.is_idempotent(&request);

    let mut attempts = 0;
    loop {
        attempts += 1;

        // Resolved per attempt so a concurrent host migration is honoured.
        let addr = addresses
            .resolve_address(node_id)
            .map_err(|_| TaskError::NodeGone { node_id })?;

        let err = match tokio::time::timeout(per_task_timeout, client.call(&addr, &request)).await {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(e)) => e,
            Err(_) => TransportError::new(
                TransportErrorKind::Timeout,
                format!("no reply from {} within {:?}", addr, per_task_timeout),
            ),
        };

        if attempts <= max_retries && should_retry(err.kind, idempotent) {
            tracing::debug!(
                "Task to node {} ({}) failed: {}; retry {}/{}",
                node_id,
                addr,
                err,
                attempts,
                max_retries
            );
            continue;
        }

        tracing::warn!(
            "Task to node {} ({}) failed after {} attempt(s): {}",
            node_id,
            addr,
            attempts,
            err
        );
        return Err(TaskError::Transport {
            error: err.kind,
            message: err.message,
            attempts,
        });
    }
}
