//! Replica consistency checks
//!
//! A check asks every replica of a tablet for its checksum at one version
//! and compares the answers. Replicas that do not answer are reported as
//! unreachable and left out of the comparison; a check where nobody answers
//! is indeterminate, never a pass.

use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::agent_client::{
    CheckConsistencyRequest, CheckConsistencyResponse, ConsistencyAgent,
};
use crate::coordinator::catalog::{
    ReplicaDescriptor, SchemaHash, StorageCatalog, TableId, TabletId, Version,
};
use crate::coordinator::dispatcher::{TaskDispatcher, TaskError};
use crate::coordinator::registry::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fewest replicas a comparison makes sense for.
pub const MIN_REPLICAS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded(u64),
    Failed(String),
    TimedOut,
}

/// Checksum request for one replica, tracked until it is terminal.
#[derive(Debug, Clone)]
pub struct ConsistencyCheckTask {
    pub node_id: NodeId,
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: Version,
    pub deadline: Instant,
    pub status: TaskStatus,
}

impl ConsistencyCheckTask {
    pub fn new(replica: &ReplicaDescriptor, version: Version, deadline: Instant) -> Self {
        Self {
            node_id: replica.node_id,
            tablet_id: replica.tablet_id,
            schema_hash: replica.schema_hash,
            version,
            deadline,
            status: TaskStatus::Pending,
        }
    }

    pub fn request(&self) -> CheckConsistencyRequest {
        CheckConsistencyRequest {
            tablet_id: self.tablet_id,
            schema_hash: self.schema_hash,
            version: self.version,
        }
    }

    fn finish(&mut self, outcome: std::result::Result<CheckConsistencyResponse, TaskError>) {
        self.status = match outcome {
            Ok(response) => TaskStatus::Succeeded(response.checksum),
            Err(e) if e.is_timeout() => TaskStatus::TimedOut,
            Err(e) => TaskStatus::Failed(e.to_string()),
        };
    }

    fn into_outcome(self) -> ReplicaOutcome {
        let result = match self.status {
            TaskStatus::Succeeded(checksum) => ReplicaResult::Checksum { checksum },
            TaskStatus::TimedOut => ReplicaResult::Unreachable {
                reason: "timeout".to_string(),
            },
            TaskStatus::Failed(reason) => ReplicaResult::Unreachable { reason },
            TaskStatus::Pending | TaskStatus::Running => ReplicaResult::Unreachable {
                reason: "not dispatched".to_string(),
            },
        };
        ReplicaOutcome {
            node_id: self.node_id,
            schema_hash: self.schema_hash,
            result,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicaResult {
    Checksum { checksum: u64 },
    Unreachable { reason: String },
    /// Replica has not reached the checked version yet.
    Stale { version: Version },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaOutcome {
    pub node_id: NodeId,
    pub schema_hash: SchemaHash,
    #[serde(flatten)]
    pub result: ReplicaResult,
}

impl ReplicaOutcome {
    pub fn checksum(&self) -> Option<u64> {
        match self.result {
            ReplicaResult::Checksum { checksum } => Some(checksum),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    Inconsistent,
    Indeterminate,
}

impl std::fmt::Display for ConsistencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConsistencyStatus::Consistent => "consistent",
            ConsistencyStatus::Inconsistent => "inconsistent",
            ConsistencyStatus::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}

/// Outcome of comparing the replica answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: ConsistencyStatus,
    pub majority_checksum: Option<u64>,
    pub outliers: Vec<NodeId>,
    pub suspects: Vec<NodeId>,
}

/// Compare the checksums in `replicas`.
///
/// Only replicas that answered take part. A checksum held by a strict
/// majority of them names the outliers; otherwise every respondent is a
/// suspect.
pub fn classify(replicas: &[ReplicaOutcome]) -> Verdict {
    let mut by_checksum: BTreeMap<u64, Vec<NodeId>> = BTreeMap::new();
    let mut respondents = 0;
    for replica in replicas {
        if let Some(checksum) = replica.checksum() {
            by_checksum.entry(checksum).or_default().push(replica.node_id);
            respondents += 1;
        }
    }

    if respondents == 0 {
        return Verdict {
            status: ConsistencyStatus::Indeterminate,
            majority_checksum: None,
            outliers: Vec::new(),
            suspects: Vec::new(),
        };
    }

    if by_checksum.len() == 1 {
        return Verdict {
            status: ConsistencyStatus::Consistent,
            majority_checksum: by_checksum.keys().next().copied(),
            outliers: Vec::new(),
            suspects: Vec::new(),
        };
    }

    let majority = by_checksum
        .iter()
        .find(|(_, nodes)| nodes.len() * 2 > respondents)
        .map(|(checksum, _)| *checksum);

    let mut verdict = Verdict {
        status: ConsistencyStatus::Inconsistent,
        majority_checksum: majority,
        outliers: Vec::new(),
        suspects: Vec::new(),
    };
    match majority {
        Some(majority) => {
            verdict.outliers = by_checksum
                .iter()
                .filter(|(checksum, _)| **checksum != majority)
                .flat_map(|(_, nodes)| nodes.iter().copied())
                .collect();
            verdict.outliers.sort();
        }
        None => {
            verdict.suspects = by_checksum.into_values().flatten().collect();
            verdict.suspects.sort();
        }
    }
    verdict
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub tablet_id: TabletId,
    pub version: Version,
    pub status: ConsistencyStatus,
    pub replicas: Vec<ReplicaOutcome>,
    pub majority_checksum: Option<u64>,
    pub outliers: Vec<NodeId>,
    pub suspects: Vec<NodeId>,
    pub checked_at: DateTime<Utc>,
}

impl ConsistencyReport {
    pub fn is_pass(&self) -> bool {
        self.status == ConsistencyStatus::Consistent
    }

    pub fn unreachable(&self) -> impl Iterator<Item = &ReplicaOutcome> {
        self.replicas
            .iter()
            .filter(|r| matches!(r.result, ReplicaResult::Unreachable { .. }))
    }
}

/// Per-tablet entry of a table check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TabletCheck {
    Checked(ConsistencyReport),
    Skipped { tablet_id: TabletId, reason: String },
}

impl TabletCheck {
    pub fn tablet_id(&self) -> TabletId {
        match self {
            TabletCheck::Checked(report) => report.tablet_id,
            TabletCheck::Skipped { tablet_id, .. } => *tablet_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub task_timeout: Duration,
    pub max_retries: u32,
    /// Upper bound for one whole check.
    pub deadline: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(5),
            max_retries: 2,
            deadline: Duration::from_secs(30),
        }
    }
}

impl From<&CoordinatorConfig> for CheckerConfig {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            task_timeout: config.task_timeout(),
            max_retries: config.max_retries,
            deadline: config.check_deadline(),
        }
    }
}

pub struct ConsistencyChecker<C>
where
    C: ConsistencyAgent,
{
    catalog: Arc<dyn StorageCatalog>,
    dispatcher: Arc<TaskDispatcher<C>>,
    config: CheckerConfig,
}

impl<C> ConsistencyChecker<C>
where
    C: ConsistencyAgent,
{
    pub fn new(
        catalog: Arc<dyn StorageCatalog>,
        dispatcher: Arc<TaskDispatcher<C>>,
        config: CheckerConfig,
    ) -> Self {
        Self {
            catalog,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn StorageCatalog> {
        &self.catalog
    }

    /// Check one tablet at `required_version`, bounded by the configured
    /// check deadline.
    pub async fn check_tablet(
        &self,
        tablet_id: TabletId,
        required_version: Version,
    ) -> Result<ConsistencyReport> {
        let deadline = Instant::now() + self.config.deadline;
        self.check_tablet_with_deadline(tablet_id, required_version, deadline)
            .await
    }

    pub async fn check_tablet_with_deadline(
        &self,
        tablet_id: TabletId,
        required_version: Version,
        deadline: Instant,
    ) -> Result<ConsistencyReport> {
        let replicas = self.catalog.resolve_replicas(tablet_id)?;
        if replicas.len() < MIN_REPLICAS {
            return Err(Error::InsufficientReplicas {
                tablet_id,
                available: replicas.len(),
            });
        }

        let mut outcomes = Vec::with_capacity(replicas.len());
        let mut tasks = Vec::with_capacity(replicas.len());
        for replica in &replicas {
            if replica.version < required_version {
                tracing::debug!(
                    "Replica of tablet {} on node {} is at version {}, behind {}",
                    tablet_id,
                    replica.node_id,
                    replica.version,
                    required_version
                );
                outcomes.push(ReplicaOutcome {
                    node_id: replica.node_id,
                    schema_hash: replica.schema_hash,
                    result: ReplicaResult::Stale {
                        version: replica.version,
                    },
                });
                continue;
            }
            tasks.push(ConsistencyCheckTask::new(replica, required_version, deadline));
        }

        let requests = tasks
            .iter_mut()
            .map(|task| {
                task.status = TaskStatus::Running;
                (task.node_id, task.request())
            })
            .collect();
        let mut results = self
            .dispatcher
            .dispatch_until(
                requests,
                self.config.task_timeout,
                self.config.max_retries,
                Some(deadline),
            )
            .await;

        for mut task in tasks {
            let result = results
                .remove(&task.node_id)
                .unwrap_or(Err(TaskError::Cancelled));
            task.finish(result);
            outcomes.push(task.into_outcome());
        }
        outcomes.sort_by_key(|o| o.node_id);

        let verdict = classify(&outcomes);
        let report = ConsistencyReport {
            tablet_id,
            version: required_version,
            status: verdict.status,
            replicas: outcomes,
            majority_checksum: verdict.majority_checksum,
            outliers: verdict.outliers,
            suspects: verdict.suspects,
            checked_at: Utc::now(),
        };

        match report.status {
            ConsistencyStatus::Consistent => tracing::info!(
                "Tablet {} is consistent at version {} ({} unreachable)",
                tablet_id,
                required_version,
                report.unreachable().count()
            ),
            ConsistencyStatus::Inconsistent => tracing::warn!(
                "Tablet {} is INCONSISTENT at version {}: outliers={:?} suspects={:?}",
                tablet_id,
                required_version,
                report.outliers,
                report.suspects
            ),
            ConsistencyStatus::Indeterminate => tracing::warn!(
                "Tablet {} could not be checked at version {}: no replica answered",
                tablet_id,
                required_version
            ),
        }

        Ok(report)
    }

    /// Check every tablet of a table concurrently under one shared deadline.
    pub async fn check_table(
        &self,
        table_id: TableId,
        required_version: Version,
    ) -> Result<Vec<TabletCheck>> {
        let tablet_ids = self.catalog.tablets_of_table(table_id)?;
        let deadline = Instant::now() + self.config.deadline;
        tracing::info!(
            "Checking {} tablet(s) of table {} at version {}",
            tablet_ids.len(),
            table_id,
            required_version
        );

        let checks = tablet_ids.iter().map(|&tablet_id| async move {
            match self
                .check_tablet_with_deadline(tablet_id, required_version, deadline)
                .await
            {
                Ok(report) => TabletCheck::Checked(report),
                Err(e) => TabletCheck::Skipped {
                    tablet_id,
                    reason: e.to_string(),
                },
            }
        });
        Ok(futures_util::future::join_all(checks).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::agent_client::{AgentClient, TransportError, TransportErrorKind};
    use crate::coordinator::catalog::InMemoryCatalog;
    use crate::coordinator::registry::{AddressBook, NodeAddress};
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;

    const BASE_PORT: u16 = 20_000;

    struct PortBook;

    impl AddressBook for PortBook {
        fn resolve_address(&self, id: NodeId) -> Result<NodeAddress> {
            Ok(NodeAddress::new("127.0.0.1", BASE_PORT + id.0 as u16))
        }
    }

    /// Answers with a fixed checksum per node; missing nodes time out.
    struct ChecksumAgent(HashMap<u64, u64>);

    impl AgentClient for ChecksumAgent {
        type Request = CheckConsistencyRequest;
        type Response = CheckConsistencyResponse;

        fn call<'a>(
            &'a self,
            addr: &'a NodeAddress,
            _request: &'a CheckConsistencyRequest,
        ) -> BoxFuture<'a, std::result::Result<CheckConsistencyResponse, TransportError>> {
            Box::pin(async move {
                let node = (addr.port - BASE_PORT) as u64;
                match self.0.get(&node) {
                    Some(checksum) => Ok(CheckConsistencyResponse {
                        checksum: *checksum,
                    }),
                    None => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Err(TransportError::new(TransportErrorKind::Timeout, "late"))
                    }
                }
            })
        }
    }

    fn checker(
        catalog: InMemoryCatalog,
        checksums: &[(u64, u64)],
    ) -> ConsistencyChecker<ChecksumAgent> {
        let agent = Arc::new(ChecksumAgent(checksums.iter().copied().collect()));
        let dispatcher = Arc::new(TaskDispatcher::new(agent, Arc::new(PortBook), 16));
        ConsistencyChecker::new(
            Arc::new(catalog),
            dispatcher,
            CheckerConfig {
                task_timeout: Duration::from_millis(50),
                max_retries: 1,
                deadline: Duration::from_secs(5),
            },
        )
    }

    fn catalog_with(tablet_id: TabletId, nodes: &[(u64, Version)]) -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        catalog.put_tablet(
            1,
            tablet_id,
            nodes.iter().map(|(node, version)| (NodeId(*node), 7, *version)),
        );
        catalog
    }

    fn outcome(node: u64, checksum: Option<u64>) -> ReplicaOutcome {
        ReplicaOutcome {
            node_id: NodeId(node),
            schema_hash: 7,
            result: match checksum {
                Some(checksum) => ReplicaResult::Checksum { checksum },
                None => ReplicaResult::Unreachable {
                    reason: "timeout".into(),
                },
            },
        }
    }

    #[test]
    fn test_classify_all_equal() {
        let verdict = classify(&[outcome(1, Some(5)), outcome(2, Some(5)), outcome(3, Some(5))]);
        assert_eq!(verdict.status, ConsistencyStatus::Consistent);
        assert_eq!(verdict.majority_checksum, Some(5));
        assert!(verdict.outliers.is_empty());
    }

    #[test]
    fn test_classify_majority_and_outlier() {
        let verdict = classify(&[outcome(1, Some(5)), outcome(2, Some(5)), outcome(3, Some(9))]);
        assert_eq!(verdict.status, ConsistencyStatus::Inconsistent);
        assert_eq!(verdict.majority_checksum, Some(5));
        assert_eq!(verdict.outliers, vec![NodeId(3)]);
        assert!(verdict.suspects.is_empty());
    }

    #[test]
    fn test_classify_two_differing_has_no_majority() {
        let verdict = classify(&[outcome(1, Some(5)), outcome(2, Some(9))]);
        assert_eq!(verdict.status, ConsistencyStatus::Inconsistent);
        assert_eq!(verdict.majority_checksum, None);
        assert_eq!(verdict.suspects, vec![NodeId(1), NodeId(2)]);
    }

    #[test]
    fn test_classify_all_distinct() {
        let verdict = classify(&[outcome(3, Some(1)), outcome(1, Some(2)), outcome(2, Some(3))]);
        assert_eq!(verdict.status, ConsistencyStatus::Inconsistent);
        assert_eq!(verdict.majority_checksum, None);
        assert_eq!(verdict.suspects, vec![NodeId(1), NodeId(2), NodeId(3)]);
    }

    #[test]
    fn test_classify_ignores_unreachable() {
        let verdict = classify(&[outcome(1, Some(5)), outcome(2, None)]);
        assert_eq!(verdict.status, ConsistencyStatus::Consistent);

        let verdict = classify(&[outcome(1, None), outcome(2, None)]);
        assert_eq!(verdict.status, ConsistencyStatus::Indeterminate);
    }

    #[tokio::test]
    async fn test_check_finds_outlier() {
        let checker = checker(
            catalog_with(10, &[(1, 4), (2, 4), (3, 4)]),
            &[(1, 0xAA), (2, 0xAA), (3, 0xBB)],
        );
        let report = checker.check_tablet(10, 4).await.unwrap();
        assert_eq!(report.status, ConsistencyStatus::Inconsistent);
        assert_eq!(report.majority_checksum, Some(0xAA));
        assert_eq!(report.outliers, vec![NodeId(3)]);
        assert!(!report.is_pass());
    }

    #[tokio::test]
    async fn test_check_tolerates_one_timeout() {
        let checker = checker(catalog_with(10, &[(1, 4), (2, 4)]), &[(1, 0xAA)]);
        let report = checker.check_tablet(10, 4).await.unwrap();
        assert_eq!(report.status, ConsistencyStatus::Consistent);
        assert!(report.is_pass());
        let unreachable: Vec<_> = report.unreachable().collect();
        assert_eq!(unreachable.len(), 1);
        assert_eq!(unreachable[0].node_id, NodeId(2));
        assert_eq!(
            unreachable[0].result,
            ReplicaResult::Unreachable {
                reason: "timeout".into()
            }
        );
    }

    #[tokio::test]
    async fn test_check_all_unreachable_is_indeterminate() {
        let checker = checker(catalog_with(10, &[(1, 4), (2, 4), (3, 4)]), &[]);
        let report = checker.check_tablet(10, 4).await.unwrap();
        assert_eq!(report.status, ConsistencyStatus::Indeterminate);
        assert!(!report.is_pass());
        assert_eq!(report.unreachable().count(), 3);
    }

    #[tokio::test]
    async fn test_check_requires_two_replicas() {
        let checker = checker(catalog_with(10, &[(1, 4)]), &[(1, 0xAA)]);
        let err = checker.check_tablet(10, 4).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientReplicas {
                tablet_id: 10,
                available: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_check_unknown_tablet() {
        let checker = checker(InMemoryCatalog::new(), &[]);
        assert!(matches!(
            checker.check_tablet(99, 1).await,
            Err(Error::TabletNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_stale_replica_not_dispatched() {
        let checker = checker(
            catalog_with(10, &[(1, 5), (2, 5), (3, 3)]),
            &[(1, 0xAA), (2, 0xAA), (3, 0xFF)],
        );
        let report = checker.check_tablet(10, 5).await.unwrap();
        assert_eq!(report.status, ConsistencyStatus::Consistent);
        let stale = report
            .replicas
            .iter()
            .find(|r| r.node_id == NodeId(3))
            .unwrap();
        assert_eq!(stale.result, ReplicaResult::Stale { version: 3 });
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_check() {
        let config = CheckerConfig {
            task_timeout: Duration::from_secs(10),
            ..CheckerConfig::default()
        };
        let agent = Arc::new(ChecksumAgent([(1, 0xAA)].into_iter().collect()));
        let dispatcher = Arc::new(TaskDispatcher::new(agent, Arc::new(PortBook), 16));
        let checker = ConsistencyChecker::new(
            Arc::new(catalog_with(10, &[(1, 4), (2, 4)])),
            dispatcher,
            config,
        );

        let started = std::time::Instant::now();
        let report = checker
            .check_tablet_with_deadline(10, 4, Instant::now() + Duration::from_millis(200))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.status, ConsistencyStatus::Consistent);
        assert_eq!(report.unreachable().count(), 1);
    }

    #[tokio::test]
    async fn test_check_table_folds_errors() {
        let catalog = InMemoryCatalog::new();
        catalog.put_tablet(1, 10, [(NodeId(1), 7, 4), (NodeId(2), 7, 4)]);
        catalog.put_tablet(1, 11, [(NodeId(1), 7, 4)]);
        let checker = checker(catalog, &[(1, 0xAA), (2, 0xAA)]);

        let mut checks = checker.check_table(1, 4).await.unwrap();
        checks.sort_by_key(|c| c.tablet_id());
        assert_eq!(checks.len(), 2);
        assert!(matches!(&checks[0], TabletCheck::Checked(r) if r.is_pass()));
        assert!(matches!(&checks[1], TabletCheck::Skipped { tablet_id: 11, .. }));

        assert!(matches!(
            checker.check_table(2, 4).await,
            Err(Error::TableNotFound(2))
        ));
    }

    #[test]
    fn test_report_json_shape() {
        let value = serde_json::to_value(outcome(4, Some(12))).unwrap();
        assert_eq!(value["node_id"], 4);
        assert_eq!(value["kind"], "checksum");
        assert_eq!(value["checksum"], 12);
    }
}
