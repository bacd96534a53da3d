//! Compensation log for multi-step provisioning.
//!
//! Each step that creates or mutates a Docker resource appends a tagged
//! record describing how to undo it. On failure the log is replayed in
//! strict reverse order; every record is attempted even when earlier ones
//! fail, and the failures are aggregated into one error. A manager lives
//! for exactly one provisioning or start attempt.

use std::sync::Arc;

use async_trait::async_trait;

use crate::docker::container::ContainerOps;
use crate::docker::volumes::VolumeOps;
use crate::errors::{OrchestratorError, OrchestratorResult};

/// What kind of compensation a record calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackKind {
    /// Remove the volume pair addressed by its data volume name.
    RemoveVolumePair,
    /// Force-remove a container by name.
    RemoveContainer,
    /// Gracefully stop a container by name.
    StopContainer,
}

/// One undo record.
#[derive(Debug, Clone)]
pub struct RollbackAction {
    pub kind: RollbackKind,
    /// Docker resource name the compensation targets.
    pub resource_id: String,
    /// Human-readable note for logs.
    pub description: String,
}

/// Executes one compensation record.
#[async_trait]
pub trait Compensate: Send + Sync {
    async fn compensate(&self, action: &RollbackAction) -> OrchestratorResult<()>;
}

/// Dispatches records onto the real Docker components.
pub struct DockerCompensator {
    containers: Arc<dyn ContainerOps>,
    volumes: Arc<dyn VolumeOps>,
}

impl DockerCompensator {
    pub fn new(containers: Arc<dyn ContainerOps>, volumes: Arc<dyn VolumeOps>) -> Self {
        Self {
            containers,
            volumes,
        }
    }
}

#[async_trait]
impl Compensate for DockerCompensator {
    async fn compensate(&self, action: &RollbackAction) -> OrchestratorResult<()> {
        match action.kind {
            RollbackKind::RemoveVolumePair => {
                self.volumes.remove_volume_pair(&action.resource_id).await
            }
            RollbackKind::RemoveContainer => self.containers.remove(&action.resource_id).await,
            RollbackKind::StopContainer => self.containers.stop(&action.resource_id).await,
        }
    }
}

/// Ordered undo log for one attempt.
pub struct RollbackManager {
    actions: Vec<RollbackAction>,
    compensator: Arc<dyn Compensate>,
}

impl RollbackManager {
    pub fn new(compensator: Arc<dyn Compensate>) -> Self {
        Self {
            actions: Vec::new(),
            compensator,
        }
    }

    /// Record an undo step for a resource just created or mutated.
    pub fn add_action(
        &mut self,
        kind: RollbackKind,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.actions.push(RollbackAction {
            kind,
            resource_id: resource_id.into(),
            description: description.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drop the log without executing it; the attempt succeeded.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Replay the log in reverse order.
    ///
    /// Every record is attempted; failures are collected and returned as
    /// one aggregate error. The log is empty afterwards either way.
    pub async fn rollback(&mut self) -> OrchestratorResult<()> {
        let actions = std::mem::take(&mut self.actions);
        let mut failures = Vec::new();

        for action in actions.iter().rev() {
            tracing::info!(
                resource = %action.resource_id,
                step = %action.description,
                "rolling back"
            );
            if let Err(err) = self.compensator.compensate(action).await {
                tracing::error!(
                    resource = %action.resource_id,
                    step = %action.description,
                    error = %err,
                    "rollback step failed"
                );
                failures.push(format!("{}: {}", action.description, err));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Rollback { failures })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records the order of compensations and optionally fails on chosen
    /// resources.
    struct RecordingCompensator {
        seen: Mutex<Vec<String>>,
        fail_on: Vec<String>,
    }

    impl RecordingCompensator {
        fn new(fail_on: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl Compensate for RecordingCompensator {
        async fn compensate(&self, action: &RollbackAction) -> OrchestratorResult<()> {
            self.seen.lock().push(action.resource_id.clone());
            if self.fail_on.contains(&action.resource_id) {
                return Err(OrchestratorError::Internal("simulated".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rollback_runs_in_reverse_order() {
        let compensator = RecordingCompensator::new(&[]);
        let mut manager = RollbackManager::new(compensator.clone());
        manager.add_action(RollbackKind::RemoveVolumePair, "vol", "remove volumes");
        manager.add_action(RollbackKind::RemoveContainer, "ctr", "remove container");
        manager.add_action(RollbackKind::StopContainer, "ctr", "stop container");

        manager.rollback().await.unwrap();
        assert_eq!(*compensator.seen.lock(), vec!["ctr", "ctr", "vol"]);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_continues_past_failures_and_aggregates() {
        let compensator = RecordingCompensator::new(&["ctr"]);
        let mut manager = RollbackManager::new(compensator.clone());
        manager.add_action(RollbackKind::RemoveVolumePair, "vol", "remove volumes");
        manager.add_action(RollbackKind::RemoveContainer, "ctr", "remove container");

        let err = manager.rollback().await.unwrap_err();
        // The failing container step must not stop the volume step.
        assert_eq!(*compensator.seen.lock(), vec!["ctr", "vol"]);
        match err {
            OrchestratorError::Rollback { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("remove container"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clear_discards_log() {
        let compensator = RecordingCompensator::new(&[]);
        let mut manager = RollbackManager::new(compensator.clone());
        manager.add_action(RollbackKind::RemoveContainer, "ctr", "remove container");
        manager.clear();

        manager.rollback().await.unwrap();
        assert!(compensator.seen.lock().is_empty());
    }
}
