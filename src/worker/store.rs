//! In-memory replica store
//!
//! Each tablet replica is a list of versioned rows. The checksum of a
//! replica at version `v` covers every row written at or before `v`, in key
//! order, so two replicas that applied the same writes agree regardless of
//! the order they received them in.

use crate::common::{Error, Result};
use crate::coordinator::catalog::{SchemaHash, TabletId, Version};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub version: Version,
    pub key: String,
    pub value: String,
}

/// Body of `PUT /api/tablets/:tablet_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaData {
    pub schema_hash: SchemaHash,
    /// Highest version this replica has applied.
    pub version: Version,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// Startup file for a worker: every replica it hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub tablets: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub tablet_id: TabletId,
    #[serde(flatten)]
    pub data: ReplicaData,
}

struct Replica {
    schema_hash: SchemaHash,
    version: Version,
    rows: Vec<Row>,
}

impl Replica {
    fn new(mut data: ReplicaData) -> Self {
        data.rows
            .sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        Self {
            schema_hash: data.schema_hash,
            version: data.version,
            rows: data.rows,
        }
    }

    fn checksum(&self, version: Version) -> u64 {
        let mut hasher = blake3::Hasher::new();
        for row in self.rows.iter().filter(|r| r.version <= version) {
            hasher.update(&row.version.to_le_bytes());
            hasher.update(&(row.key.len() as u64).to_le_bytes());
            hasher.update(row.key.as_bytes());
            hasher.update(&(row.value.len() as u64).to_le_bytes());
            hasher.update(row.value.as_bytes());
        }
        let hash = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(prefix)
    }
}

#[derive(Default)]
pub struct ReplicaStore {
    replicas: RwLock<HashMap<TabletId, Replica>>,
}

impl ReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: WorkerSnapshot = serde_json::from_str(&content)?;
        let store = Self::new();
        for entry in snapshot.tablets {
            store.load(entry.tablet_id, entry.data);
        }
        tracing::info!(
            "Loaded {} replica(s) from {}",
            store.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    /// Insert or replace a replica. Returns the number of rows stored.
    pub fn load(&self, tablet_id: TabletId, data: ReplicaData) -> usize {
        let replica = Replica::new(data);
        let rows = replica.rows.len();
        self.replicas.write().insert(tablet_id, replica);
        rows
    }

    pub fn remove(&self, tablet_id: TabletId) -> bool {
        self.replicas.write().remove(&tablet_id).is_some()
    }

    /// Checksum of a replica's rows at `version`.
    pub fn checksum(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        version: Version,
    ) -> Result<u64> {
        let replicas = self.replicas.read();
        let replica = replicas
            .get(&tablet_id)
            .ok_or(Error::TabletNotFound(tablet_id))?;
        if replica.schema_hash != schema_hash {
            return Err(Error::SchemaMismatch {
                tablet_id,
                expected: replica.schema_hash,
                actual: schema_hash,
            });
        }
        if version > replica.version {
            return Err(Error::VersionNotReached {
                tablet_id,
                requested: version,
                available: replica.version,
            });
        }
        Ok(replica.checksum(version))
    }

    pub fn tablet_ids(&self) -> Vec<TabletId> {
        let mut ids: Vec<_> = self.replicas.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.replicas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.read().is_empty()
    }
}
