//! Startup reconciliation sweep.
//!
//! Persisted records describe intent; the Docker daemon holds the truth.
//! The sweep walks every instance, overwrites stale persisted statuses
//! from live container state, and repairs missing volumes and config
//! files. Per-instance failures are logged and counted, never fatal, so
//! one broken instance cannot block the rest of the fleet.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{
    GAME_INI_FILE, GAME_USER_SETTINGS_FILE, default_game_ini, default_game_user_settings,
};
use crate::docker::config_files::ConfigIo;
use crate::docker::container::{ContainerOps, ContainerStatus};
use crate::docker::volumes::VolumeOps;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::instance::{InstanceStatus, ServerInstance};
use crate::naming::ResourceNames;
use crate::store::InstanceStore;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub instances: usize,
    pub statuses_corrected: usize,
    pub volume_pairs_created: usize,
    pub config_files_created: usize,
    pub failures: usize,
}

/// Walks the fleet and converges records and resources.
pub struct Reconciler {
    containers: Arc<dyn ContainerOps>,
    volumes: Arc<dyn VolumeOps>,
    config_io: Arc<dyn ConfigIo>,
    store: Arc<dyn InstanceStore>,
}

impl Reconciler {
    pub fn new(
        containers: Arc<dyn ContainerOps>,
        volumes: Arc<dyn VolumeOps>,
        config_io: Arc<dyn ConfigIo>,
        store: Arc<dyn InstanceStore>,
    ) -> Self {
        Self {
            containers,
            volumes,
            config_io,
            store,
        }
    }

    /// Run one sweep over all persisted instances.
    ///
    /// The caller is expected to have verified daemon liveness; errors
    /// here are per-instance and only counted.
    pub async fn run(&self) -> OrchestratorResult<ReconcileReport> {
        let instances = self.store.list().await?;
        // One batch query instead of two inspects per instance.
        let existing_volumes: HashSet<String> =
            self.volumes.list_volume_names().await?.into_iter().collect();

        let mut report = ReconcileReport {
            instances: instances.len(),
            ..Default::default()
        };

        for instance in &instances {
            if let Err(err) = self
                .reconcile_instance(instance, &existing_volumes, &mut report)
                .await
            {
                tracing::error!(
                    instance_id = instance.id,
                    error = %err,
                    "instance reconciliation failed"
                );
                report.failures += 1;
            }
        }

        tracing::info!(
            instances = report.instances,
            corrected = report.statuses_corrected,
            volumes = report.volume_pairs_created,
            configs = report.config_files_created,
            failures = report.failures,
            "reconciliation sweep complete"
        );
        Ok(report)
    }

    async fn reconcile_instance(
        &self,
        instance: &ServerInstance,
        existing_volumes: &HashSet<String>,
        report: &mut ReconcileReport,
    ) -> OrchestratorResult<()> {
        let names = ResourceNames::for_instance(instance.id);

        if !existing_volumes.contains(&names.data_volume)
            || !existing_volumes.contains(&names.plugins_volume)
        {
            tracing::info!(instance_id = instance.id, "repairing missing volume pair");
            self.volumes.create_volume_pair(instance.id).await?;
            report.volume_pairs_created += 1;
        }

        report.config_files_created += self.ensure_default_configs(instance).await?;

        let live = self.containers.status(&names.container).await?;
        let observed = match live {
            ContainerStatus::Running => Some(InstanceStatus::Running),
            ContainerStatus::Starting => Some(InstanceStatus::Starting),
            ContainerStatus::Stopped | ContainerStatus::NotFound => Some(InstanceStatus::Stopped),
            // Nothing trustworthy to converge on.
            ContainerStatus::Unknown => None,
        };
        if let Some(observed) = observed {
            if observed != instance.status {
                tracing::info!(
                    instance_id = instance.id,
                    persisted = %instance.status,
                    observed = %observed,
                    "correcting persisted status from live state"
                );
                self.store.update_status(instance.id, observed).await?;
                report.statuses_corrected += 1;
            }
        }
        Ok(())
    }

    /// Create each default config file that does not exist yet. Existing
    /// files are never overwritten.
    async fn ensure_default_configs(&self, instance: &ServerInstance) -> OrchestratorResult<usize> {
        let defaults = [
            (GAME_USER_SETTINGS_FILE, default_game_user_settings(instance)),
            (GAME_INI_FILE, default_game_ini()),
        ];

        let mut created = 0;
        for (file_name, content) in defaults {
            match self.config_io.read_file(instance.id, file_name).await {
                Ok(_) => {}
                Err(OrchestratorError::NotFound(_)) => {
                    tracing::info!(
                        instance_id = instance.id,
                        file = %file_name,
                        "creating missing default config file"
                    );
                    self.config_io
                        .write_file(instance.id, file_name, &content)
                        .await?;
                    created += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::config_files::FolderInfo;
    use crate::docker::container::ContainerSpec;
    use crate::instance::test_instance;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeContainers {
        statuses: HashMap<String, ContainerStatus>,
    }

    #[async_trait]
    impl ContainerOps for FakeContainers {
        async fn create(&self, _spec: &ContainerSpec) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn start(&self, _name: &str) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn stop(&self, _name: &str) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn remove(&self, _name: &str) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn exists(&self, name: &str) -> OrchestratorResult<bool> {
            Ok(self.statuses.contains_key(name))
        }
        async fn status(&self, name: &str) -> OrchestratorResult<ContainerStatus> {
            Ok(self
                .statuses
                .get(name)
                .copied()
                .unwrap_or(ContainerStatus::NotFound))
        }
        async fn env_vars(&self, _name: &str) -> OrchestratorResult<HashMap<String, String>> {
            Ok(HashMap::new())
        }
        async fn exec(&self, _name: &str, _command: &str) -> OrchestratorResult<String> {
            Ok(String::new())
        }
    }

    struct FakeVolumes {
        existing: Vec<String>,
        created: Mutex<Vec<u64>>,
        fail_for: Option<u64>,
    }

    #[async_trait]
    impl VolumeOps for FakeVolumes {
        async fn create_volume_pair(&self, instance_id: u64) -> OrchestratorResult<()> {
            if self.fail_for == Some(instance_id) {
                return Err(OrchestratorError::Internal("simulated".into()));
            }
            self.created.lock().push(instance_id);
            Ok(())
        }
        async fn remove_volume_pair(&self, _data_volume: &str) -> OrchestratorResult<()> {
            Ok(())
        }
        async fn volume_exists(&self, name: &str) -> OrchestratorResult<bool> {
            Ok(self.existing.iter().any(|v| v == name))
        }
        async fn list_volume_names(&self) -> OrchestratorResult<Vec<String>> {
            Ok(self.existing.clone())
        }
    }

    #[derive(Default)]
    struct FakeConfigIo {
        files: Mutex<HashMap<(u64, String), String>>,
    }

    #[async_trait]
    impl ConfigIo for FakeConfigIo {
        async fn read_file(&self, instance_id: u64, file_name: &str) -> OrchestratorResult<String> {
            self.files
                .lock()
                .get(&(instance_id, file_name.to_string()))
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound(file_name.to_string()))
        }
        async fn write_file(
            &self,
            instance_id: u64,
            file_name: &str,
            content: &str,
        ) -> OrchestratorResult<()> {
            self.files
                .lock()
                .insert((instance_id, file_name.to_string()), content.to_string());
            Ok(())
        }
        async fn folder_info(&self, _instance_id: u64) -> OrchestratorResult<FolderInfo> {
            Ok(FolderInfo { size_bytes: 0 })
        }
    }

    fn volume_names_for(ids: &[u64]) -> Vec<String> {
        ids.iter()
            .flat_map(|id| {
                let names = ResourceNames::for_instance(*id);
                [names.data_volume, names.plugins_volume]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_live_state_overwrites_persisted_status() {
        let store = MemoryStore::new();
        let mut running = test_instance(1);
        running.status = InstanceStatus::Running; // container is gone
        store.upsert(running).await.unwrap();
        let mut stopped = test_instance(2);
        stopped.status = InstanceStatus::Stopped; // container actually runs
        store.upsert(stopped).await.unwrap();

        let mut statuses = HashMap::new();
        statuses.insert("ase-server-2".to_string(), ContainerStatus::Running);
        let reconciler = Reconciler::new(
            Arc::new(FakeContainers { statuses }),
            Arc::new(FakeVolumes {
                existing: volume_names_for(&[1, 2]),
                created: Mutex::new(Vec::new()),
                fail_for: None,
            }),
            Arc::new(FakeConfigIo::default()),
            store.clone(),
        );

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.statuses_corrected, 2);
        assert_eq!(
            store.get(1).await.unwrap().unwrap().status,
            InstanceStatus::Stopped
        );
        assert_eq!(
            store.get(2).await.unwrap().unwrap().status,
            InstanceStatus::Running
        );
    }

    #[tokio::test]
    async fn test_missing_volumes_are_recreated() {
        let store = MemoryStore::new();
        store.upsert(test_instance(1)).await.unwrap();
        store.upsert(test_instance(2)).await.unwrap();

        let volumes = Arc::new(FakeVolumes {
            // Instance 2 lost its plugins volume.
            existing: {
                let mut v = volume_names_for(&[1]);
                v.push("ase-server-2".to_string());
                v
            },
            created: Mutex::new(Vec::new()),
            fail_for: None,
        });
        let reconciler = Reconciler::new(
            Arc::new(FakeContainers {
                statuses: HashMap::new(),
            }),
            volumes.clone(),
            Arc::new(FakeConfigIo::default()),
            store,
        );

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.volume_pairs_created, 1);
        assert_eq!(*volumes.created.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_missing_configs_created_but_existing_kept() {
        let store = MemoryStore::new();
        store.upsert(test_instance(1)).await.unwrap();

        let config_io = Arc::new(FakeConfigIo::default());
        config_io
            .write_file(1, GAME_USER_SETTINGS_FILE, "tenant-edited")
            .await
            .unwrap();

        let reconciler = Reconciler::new(
            Arc::new(FakeContainers {
                statuses: HashMap::new(),
            }),
            Arc::new(FakeVolumes {
                existing: volume_names_for(&[1]),
                created: Mutex::new(Vec::new()),
                fail_for: None,
            }),
            config_io.clone(),
            store,
        );

        let report = reconciler.run().await.unwrap();
        // Only Game.ini was missing.
        assert_eq!(report.config_files_created, 1);
        assert_eq!(
            config_io.read_file(1, GAME_USER_SETTINGS_FILE).await.unwrap(),
            "tenant-edited"
        );
        assert!(config_io.read_file(1, GAME_INI_FILE).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_continues_past_failures() {
        let store = MemoryStore::new();
        store.upsert(test_instance(1)).await.unwrap();
        store.upsert(test_instance(2)).await.unwrap();

        let volumes = Arc::new(FakeVolumes {
            existing: Vec::new(),
            created: Mutex::new(Vec::new()),
            fail_for: Some(1),
        });
        let reconciler = Reconciler::new(
            Arc::new(FakeContainers {
                statuses: HashMap::new(),
            }),
            volumes.clone(),
            Arc::new(FakeConfigIo::default()),
            store,
        );

        let report = reconciler.run().await.unwrap();
        assert_eq!(report.failures, 1);
        // Instance 2 was still repaired.
        assert_eq!(*volumes.created.lock(), vec![2]);
    }
}
