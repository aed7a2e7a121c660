//! Consistency operations over the cluster

pub mod consistency;
pub mod scheduler;

pub use consistency::{
    classify, CheckerConfig, ConsistencyCheckTask, ConsistencyChecker, ConsistencyReport,
    ConsistencyStatus, ReplicaOutcome, ReplicaResult, TabletCheck, TaskStatus,
};
pub use scheduler::{CheckHistory, ConsistencyScheduler};
