//! Persistence seam.
//!
//! The record store is an external collaborator; the engine treats it as an
//! opaque map of instance rows keyed by numeric ID and only ever writes the
//! `status` field back. `MemoryStore` is the in-process implementation used
//! by tests and embedders without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::instance::{InstanceStatus, ServerInstance};

/// Opaque instance-record store.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fetch one instance by ID.
    async fn get(&self, id: u64) -> OrchestratorResult<Option<ServerInstance>>;

    /// All persisted instances.
    async fn list(&self) -> OrchestratorResult<Vec<ServerInstance>>;

    /// Insert or replace a full record.
    async fn upsert(&self, instance: ServerInstance) -> OrchestratorResult<()>;

    /// Overwrite only the persisted status of an instance.
    async fn update_status(&self, id: u64, status: InstanceStatus) -> OrchestratorResult<()>;

    /// Delete a record.
    async fn remove(&self, id: u64) -> OrchestratorResult<()>;
}

/// In-memory store backed by a lock-protected map.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<u64, ServerInstance>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get(&self, id: u64) -> OrchestratorResult<Option<ServerInstance>> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<ServerInstance>> {
        let mut all: Vec<ServerInstance> = self.rows.read().values().cloned().collect();
        all.sort_by_key(|i| i.id);
        Ok(all)
    }

    async fn upsert(&self, instance: ServerInstance) -> OrchestratorResult<()> {
        self.rows.write().insert(instance.id, instance);
        Ok(())
    }

    async fn update_status(&self, id: u64, status: InstanceStatus) -> OrchestratorResult<()> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("instance {}", id)))?;
        row.status = status;
        row.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn remove(&self, id: u64) -> OrchestratorResult<()> {
        self.rows.write().remove(&id);
        Ok(())
    }
}
