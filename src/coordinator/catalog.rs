//! Storage catalog interface
//!
//! The catalog owns tablets and knows which node hosts each replica. The
//! coordinator only reads it: one point-in-time snapshot per check.

use crate::common::{Error, Result};
use crate::coordinator::registry::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub type TabletId = u64;
pub type TableId = u64;
pub type SchemaHash = i32;
pub type Version = u64;

/// One replica of a tablet as the catalog sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub tablet_id: TabletId,
    pub node_id: NodeId,
    pub schema_hash: SchemaHash,
    pub version: Version,
}

pub trait StorageCatalog: Send + Sync {
    /// Current replica set of a tablet. Fails with `TabletNotFound`.
    fn resolve_replicas(&self, tablet_id: TabletId) -> Result<Vec<ReplicaDescriptor>>;

    /// Tablets belonging to a table. Fails with `TableNotFound`.
    fn tablets_of_table(&self, table_id: TableId) -> Result<Vec<TabletId>>;

    /// Every tablet id, ascending.
    fn tablet_ids(&self) -> Vec<TabletId>;
}

/// Serialized form of an [`InMemoryCatalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub tablets: Vec<TabletEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletEntry {
    pub table_id: TableId,
    pub tablet_id: TabletId,
    pub replicas: Vec<ReplicaLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaLocation {
    pub node_id: NodeId,
    pub schema_hash: SchemaHash,
    pub version: Version,
}

struct Tablet {
    table_id: TableId,
    replicas: Vec<ReplicaDescriptor>,
}

/// Catalog held in memory, optionally seeded from a JSON file.
#[derive(Default)]
pub struct InMemoryCatalog {
    tablets: RwLock<BTreeMap<TabletId, Tablet>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let catalog = Self::new();
        for entry in snapshot.tablets {
            catalog.put_tablet(
                entry.table_id,
                entry.tablet_id,
                entry
                    .replicas
                    .into_iter()
                    .map(|r| (r.node_id, r.schema_hash, r.version)),
            );
        }
        catalog
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let snapshot: CatalogSnapshot = serde_json::from_slice(&bytes)?;
        tracing::info!(
            "Loaded catalog with {} tablet(s) from {}",
            snapshot.tablets.len(),
            path.as_ref().display()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Insert or replace a tablet's replica set.
    pub fn put_tablet<I>(&self, table_id: TableId, tablet_id: TabletId, replicas: I)
    where
        I: IntoIterator<Item = (NodeId, SchemaHash, Version)>,
    {
        let replicas = replicas
            .into_iter()
            .map(|(node_id, schema_hash, version)| ReplicaDescriptor {
                tablet_id,
                node_id,
                schema_hash,
                version,
            })
            .collect();
        self.tablets.write().insert(
            tablet_id,
            Tablet {
                table_id,
                replicas,
            },
        );
    }

    pub fn remove_tablet(&self, tablet_id: TabletId) -> bool {
        self.tablets.write().remove(&tablet_id).is_some()
    }

    /// Re-home one replica, as a clone/balance job would.
    pub fn move_replica(&self, tablet_id: TabletId, from: NodeId, to: NodeId) -> Result<()> {
        let mut tablets = self.tablets.write();
        let tablet = tablets
            .get_mut(&tablet_id)
            .ok_or(Error::TabletNotFound(tablet_id))?;
        let replica = tablet
            .replicas
            .iter_mut()
            .find(|r| r.node_id == from)
            .ok_or_else(|| Error::NodeNotFound(from.to_string()))?;
        replica.node_id = to;
        Ok(())
    }
}

impl StorageCatalog for InMemoryCatalog {
    fn resolve_replicas(&self, tablet_id: TabletId) -> Result<Vec<ReplicaDescriptor>> {
        self.tablets
            .read()
            .get(&tablet_id)
            .map(|t| t.replicas.clone())
            .ok_or(Error::TabletNotFound(tablet_id))
    }

    fn tablets_of_table(&self, table_id: TableId) -> Result<Vec<TabletId>> {
        let ids: Vec<TabletId> = self
            .tablets
            .read()
            .iter()
            .filter(|(_, t)| t.table_id == table_id)
            .map(|(id, _)| *id)
            .collect();
        if ids.is_empty() {
            return Err(Error::TableNotFound(table_id));
        }
        Ok(ids)
    }

    fn tablet_ids(&self) -> Vec<TabletId> {
        self.tablets.read().keys().copied().collect()
    }
}
