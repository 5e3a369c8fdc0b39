//! In-memory persistence gateway for the Rillflow engine
//!
//! This crate provides an in-memory implementation of the persistence
//! gateway defined in rillflow-core. It is primarily useful for
//! development, testing, and simple deployments where durable storage
//! is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use dashmap::DashMap;
use rillflow_core::domain::instance::InstanceId;
use rillflow_core::domain::persistence::{PersistenceGateway, Snapshot};
use rillflow_core::EngineError;
use tracing::debug;

/// Thread-safe in-memory snapshot store.
///
/// Stores one snapshot per root instance, keyed by instance ID. The
/// last write wins; there is no versioning.
#[derive(Debug, Default)]
pub struct InMemoryPersistenceGateway {
    snapshots: DashMap<String, Snapshot>,
}

impl InMemoryPersistenceGateway {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether the store holds no snapshots
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Seed a snapshot directly, bypassing the gateway trait
    pub fn insert(&self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot.id.clone(), snapshot);
    }

    /// Read a stored snapshot without going through the trait
    pub fn get(&self, instance_id: &str) -> Option<Snapshot> {
        self.snapshots.get(instance_id).map(|s| s.clone())
    }

    /// Drop every stored snapshot
    pub fn clear(&self) {
        self.snapshots.clear();
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPersistenceGateway {
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot, EngineError> {
        debug!(instance_id = %snapshot.id, "persisting snapshot");
        self.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn load(&self, instance_id: &InstanceId) -> Result<Option<Snapshot>, EngineError> {
        debug!(instance_id = %instance_id, "loading snapshot");
        Ok(self.snapshots.get(instance_id.as_str()).map(|s| s.clone()))
    }
}
