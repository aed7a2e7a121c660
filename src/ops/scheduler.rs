//! Background consistency checks
//!
//! Walks the catalog's tablets round-robin, one tablet per tick, checking
//! each at its newest replica version. Reports land in a bounded
//! [`CheckHistory`] the admin API serves.

use crate::coordinator::agent_client::ConsistencyAgent;
use crate::coordinator::catalog::{TabletId, Version};
use crate::ops::consistency::{ConsistencyChecker, ConsistencyReport, ConsistencyStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Most recent reports, oldest evicted first.
pub struct CheckHistory {
    capacity: usize,
    reports: Mutex<VecDeque<ConsistencyReport>>,
}

impl CheckHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            reports: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, report: ConsistencyReport) {
        let mut reports = self.reports.lock();
        if reports.len() == self.capacity {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<ConsistencyReport> {
        self.reports.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Newest first.
    pub fn for_tablet(&self, tablet_id: TabletId) -> Vec<ConsistencyReport> {
        self.reports
            .lock()
            .iter()
            .rev()
            .filter(|r| r.tablet_id == tablet_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

pub struct ConsistencyScheduler<C>
where
    C: ConsistencyAgent,
{
    checker: Arc<ConsistencyChecker<C>>,
    history: Arc<CheckHistory>,
    interval: Duration,
    cursor: Option<TabletId>,
}

impl<C> ConsistencyScheduler<C>
where
    C: ConsistencyAgent,
{
    pub fn new(
        checker: Arc<ConsistencyChecker<C>>,
        history: Arc<CheckHistory>,
        interval: Duration,
    ) -> Self {
        Self {
            checker,
            history,
            interval,
            cursor: None,
        }
    }

    /// Next tablet after the cursor, wrapping around. Tablets added or
    /// removed between ticks are picked up on the next pass.
    fn next_tablet(&mut self) -> Option<TabletId> {
        let ids = self.checker.catalog().tablet_ids();
        let next = match self.cursor {
            Some(cursor) => ids
                .iter()
                .copied()
                .find(|id| *id > cursor)
                .or_else(|| ids.first().copied()),
            None => ids.first().copied(),
        }?;
        self.cursor = Some(next);
        Some(next)
    }

    fn current_version(&self, tablet_id: TabletId) -> Option<Version> {
        self.checker
            .catalog()
            .resolve_replicas(tablet_id)
            .ok()?
            .iter()
            .map(|r| r.version)
            .max()
    }

    /// Check the next tablet. Returns the report if one was produced.
    pub async fn tick(&mut self) -> Option<ConsistencyReport> {
        let tablet_id = self.next_tablet()?;
        let version = self.current_version(tablet_id)?;

        match self.checker.check_tablet(tablet_id, version).await {
            Ok(report) => {
                if report.status != ConsistencyStatus::Consistent {
                    tracing::warn!(
                        "Scheduled check of tablet {} at version {}: {}",
                        tablet_id,
                        version,
                        report.status
                    );
                }
                self.history.record(report.clone());
                Some(report)
            }
            Err(e) => {
                tracing::debug!("Skipping scheduled check of tablet {}: {}", tablet_id, e);
                None
            }
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Consistency scheduler started (interval {:?})",
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Consistency scheduler stopped");
    }
}
