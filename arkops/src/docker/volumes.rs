//! Volume pair management.
//!
//! Each instance owns two named volumes: the data volume (world saves and
//! config files) and the plugins volume. They are created and removed as a
//! pair; the pair is the unit of atomicity for provisioning. Single-volume
//! calls go through a backend seam so the pair logic is testable without a
//! daemon.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};

use crate::docker::DockerClient;
use crate::errors::{OrchestratorResult, docker_not_found};
use crate::naming;

/// Volume operations needed by provisioning and reconciliation.
#[async_trait]
pub trait VolumeOps: Send + Sync {
    /// Ensure both volumes of an instance exist.
    async fn create_volume_pair(&self, instance_id: u64) -> OrchestratorResult<()>;

    /// Remove both volumes of a pair, addressed by the data volume name.
    async fn remove_volume_pair(&self, data_volume: &str) -> OrchestratorResult<()>;

    /// Whether a named volume exists.
    async fn volume_exists(&self, name: &str) -> OrchestratorResult<bool>;

    /// Names of all volumes known to the daemon, one batch query.
    async fn list_volume_names(&self) -> OrchestratorResult<Vec<String>>;
}

/// Single-volume operations against the daemon.
#[async_trait]
pub(crate) trait VolumeBackend: Send + Sync {
    async fn create(&self, name: &str) -> OrchestratorResult<()>;

    /// Idempotent remove; a missing volume is success.
    async fn remove(&self, name: &str) -> OrchestratorResult<()>;

    async fn exists(&self, name: &str) -> OrchestratorResult<bool>;

    async fn list_names(&self) -> OrchestratorResult<Vec<String>>;
}

/// Docker-backed single-volume calls.
struct DockerVolumeBackend {
    client: DockerClient,
}

#[async_trait]
impl VolumeBackend for DockerVolumeBackend {
    async fn create(&self, name: &str) -> OrchestratorResult<()> {
        let mut labels = HashMap::new();
        labels.insert("managed-by".to_string(), "arkops".to_string());
        self.client
            .api()
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                labels,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> OrchestratorResult<()> {
        // Non-forced: a volume still mounted by a container must surface
        // an error rather than disappear under it.
        match self.client.api().remove_volume(name, None).await {
            Ok(()) => Ok(()),
            Err(err) if docker_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, name: &str) -> OrchestratorResult<bool> {
        match self.client.api().inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(err) if docker_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_names(&self) -> OrchestratorResult<Vec<String>> {
        let response = self
            .client
            .api()
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }
}

/// Volume store enforcing the pair semantics.
pub struct VolumeStore {
    backend: Arc<dyn VolumeBackend>,
}

impl VolumeStore {
    pub fn new(client: DockerClient) -> Self {
        Self {
            backend: Arc::new(DockerVolumeBackend { client }),
        }
    }

    pub(crate) fn with_backend(backend: Arc<dyn VolumeBackend>) -> Self {
        Self { backend }
    }

    /// Idempotent single-volume create.
    async fn create_volume(&self, name: &str) -> OrchestratorResult<()> {
        if self.backend.exists(name).await? {
            tracing::debug!(volume = %name, "volume already exists, skipping create");
            return Ok(());
        }
        self.backend.create(name).await?;
        tracing::info!(volume = %name, "created volume");
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> OrchestratorResult<()> {
        self.backend.remove(name).await?;
        tracing::info!(volume = %name, "removed volume");
        Ok(())
    }
}

#[async_trait]
impl VolumeOps for VolumeStore {
    async fn create_volume_pair(&self, instance_id: u64) -> OrchestratorResult<()> {
        let names = naming::ResourceNames::for_instance(instance_id);

        self.create_volume(&names.data_volume).await?;

        // The pair is atomic: a failed plugins create must not leave a
        // half-provisioned instance behind.
        if let Err(err) = self.create_volume(&names.plugins_volume).await {
            tracing::warn!(
                instance_id,
                data_volume = %names.data_volume,
                error = %err,
                "plugins volume create failed, removing data volume"
            );
            if let Err(cleanup_err) = self.remove_volume(&names.data_volume).await {
                tracing::error!(
                    volume = %names.data_volume,
                    error = %cleanup_err,
                    "failed to remove data volume after pair failure"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    async fn remove_volume_pair(&self, data_volume: &str) -> OrchestratorResult<()> {
        self.remove_volume(data_volume).await?;

        // A stranded plugins volume only wastes space; log and move on.
        let plugins = naming::plugins_volume_for(data_volume);
        if let Err(err) = self.remove_volume(&plugins).await {
            tracing::warn!(volume = %plugins, error = %err, "plugins volume removal failed");
        }
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> OrchestratorResult<bool> {
        self.backend.exists(name).await
    }

    async fn list_volume_names(&self) -> OrchestratorResult<Vec<String>> {
        self.backend.list_names().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OrchestratorError;
    use parking_lot::Mutex;

    /// Backend over an in-memory name set, failing creates on demand.
    struct FakeBackend {
        volumes: Mutex<Vec<String>>,
        fail_create: Option<String>,
    }

    impl FakeBackend {
        fn new(fail_create: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                volumes: Mutex::new(Vec::new()),
                fail_create: fail_create.map(str::to_string),
            })
        }
    }

    #[async_trait]
    impl VolumeBackend for FakeBackend {
        async fn create(&self, name: &str) -> OrchestratorResult<()> {
            if self.fail_create.as_deref() == Some(name) {
                return Err(OrchestratorError::Internal("simulated".into()));
            }
            self.volumes.lock().push(name.to_string());
            Ok(())
        }

        async fn remove(&self, name: &str) -> OrchestratorResult<()> {
            self.volumes.lock().retain(|v| v != name);
            Ok(())
        }

        async fn exists(&self, name: &str) -> OrchestratorResult<bool> {
            Ok(self.volumes.lock().iter().any(|v| v == name))
        }

        async fn list_names(&self) -> OrchestratorResult<Vec<String>> {
            Ok(self.volumes.lock().clone())
        }
    }

    #[tokio::test]
    async fn test_pair_create_makes_both_volumes() {
        let backend = FakeBackend::new(None);
        let store = VolumeStore::with_backend(backend.clone());

        store.create_volume_pair(7).await.unwrap();
        assert!(store.volume_exists("ase-server-7").await.unwrap());
        assert!(store.volume_exists("ase-server-plugins-7").await.unwrap());
    }

    #[tokio::test]
    async fn test_pair_create_is_idempotent() {
        let backend = FakeBackend::new(None);
        let store = VolumeStore::with_backend(backend.clone());

        store.create_volume_pair(7).await.unwrap();
        store.create_volume_pair(7).await.unwrap();
        assert_eq!(backend.volumes.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_plugins_create_removes_data_volume() {
        let backend = FakeBackend::new(Some("ase-server-plugins-7"));
        let store = VolumeStore::with_backend(backend.clone());

        let err = store.create_volume_pair(7).await;
        assert!(err.is_err());
        // Neither half of the pair may survive the failure.
        assert!(!store.volume_exists("ase-server-7").await.unwrap());
        assert!(!store.volume_exists("ase-server-plugins-7").await.unwrap());
    }

    #[tokio::test]
    async fn test_pair_removal_takes_plugins_volume_along() {
        let backend = FakeBackend::new(None);
        let store = VolumeStore::with_backend(backend.clone());

        store.create_volume_pair(9).await.unwrap();
        store.remove_volume_pair("ase-server-9").await.unwrap();
        assert!(backend.volumes.lock().is_empty());
    }
}
