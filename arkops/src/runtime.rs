//! Orchestrator facade.
//!
//! Single entry point for embedders: owns the Docker client, wires the
//! components together, and enforces the synchronous guards before any
//! background lifecycle task is spawned.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    GAME_INI_FILE, GAME_USER_SETTINGS_FILE, default_game_ini, default_game_user_settings,
};
use crate::docker::DockerClient;
use crate::docker::config_files::{ConfigFileBridge, ConfigIo, FolderInfo};
use crate::docker::container::{ContainerOps, ContainerRuntime};
use crate::docker::images::{FleetImageStatus, ImageOps, ImagePullTracker, ImageStatus, PullRegistry};
use crate::docker::volumes::{VolumeOps, VolumeStore};
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::instance::{InstanceStatus, ServerInstance};
use crate::lifecycle::{Lifecycle, LifecycleTicket};
use crate::naming::ResourceNames;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::rollback::{DockerCompensator, RollbackKind, RollbackManager};
use crate::store::InstanceStore;

/// Game-server orchestration engine.
pub struct Orchestrator {
    client: DockerClient,
    store: Arc<dyn InstanceStore>,
    containers: Arc<dyn ContainerOps>,
    volumes: Arc<dyn VolumeOps>,
    images: Arc<dyn ImageOps>,
    config_io: Arc<dyn ConfigIo>,
    lifecycle: Arc<Lifecycle>,
    reconciler: Reconciler,
}

impl Orchestrator {
    /// Connect to the local Docker daemon and assemble the engine.
    pub async fn connect(store: Arc<dyn InstanceStore>) -> OrchestratorResult<Self> {
        let client = DockerClient::connect().await?;
        Ok(Self::assemble(client, store))
    }

    /// Assemble the engine around an existing client.
    pub fn assemble(client: DockerClient, store: Arc<dyn InstanceStore>) -> Self {
        let containers: Arc<dyn ContainerOps> = Arc::new(ContainerRuntime::new(client.clone()));
        let volumes: Arc<dyn VolumeOps> = Arc::new(VolumeStore::new(client.clone()));
        let images: Arc<dyn ImageOps> =
            Arc::new(ImagePullTracker::new(client.clone(), PullRegistry::new()));
        let config_io: Arc<dyn ConfigIo> = Arc::new(ConfigFileBridge::new(client.clone()));
        Self::from_components(client, containers, volumes, images, config_io, store)
    }

    /// Wire the engine from explicit components. The seam used by tests
    /// and by embedders with custom transports.
    pub fn from_components(
        client: DockerClient,
        containers: Arc<dyn ContainerOps>,
        volumes: Arc<dyn VolumeOps>,
        images: Arc<dyn ImageOps>,
        config_io: Arc<dyn ConfigIo>,
        store: Arc<dyn InstanceStore>,
    ) -> Self {
        let lifecycle = Lifecycle::new(
            containers.clone(),
            volumes.clone(),
            images.clone(),
            store.clone(),
        );
        let reconciler = Reconciler::new(
            containers.clone(),
            volumes.clone(),
            config_io.clone(),
            store.clone(),
        );
        Self {
            client,
            store,
            containers,
            volumes,
            images,
            config_io,
            lifecycle,
            reconciler,
        }
    }

    async fn instance(&self, id: u64) -> OrchestratorResult<ServerInstance> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("instance {}", id)))
    }

    /// Create the Docker resources for a new instance: the volume pair and
    /// both default config files. Partial failure rolls everything back.
    pub async fn provision(&self, instance: &ServerInstance) -> OrchestratorResult<()> {
        let names = ResourceNames::for_instance(instance.id);
        let mut rollback = RollbackManager::new(Arc::new(DockerCompensator::new(
            self.containers.clone(),
            self.volumes.clone(),
        )));

        tracing::info!(instance_id = instance.id, "provisioning instance resources");
        self.volumes.create_volume_pair(instance.id).await?;
        rollback.add_action(
            RollbackKind::RemoveVolumePair,
            &names.data_volume,
            format!("remove volume pair {}", names.data_volume),
        );

        let seeded = async {
            self.config_io
                .write_file(
                    instance.id,
                    GAME_USER_SETTINGS_FILE,
                    &default_game_user_settings(instance),
                )
                .await?;
            self.config_io
                .write_file(instance.id, GAME_INI_FILE, &default_game_ini())
                .await
        }
        .await;

        if let Err(err) = seeded {
            tracing::error!(instance_id = instance.id, error = %err, "provisioning failed, rolling back");
            if let Err(rollback_err) = rollback.rollback().await {
                tracing::error!(instance_id = instance.id, error = %rollback_err, "rollback incomplete");
            }
            return Err(err);
        }

        rollback.clear();
        Ok(())
    }

    /// Tear down an instance's Docker resources. Refused while the
    /// instance is running or starting.
    pub async fn deprovision(&self, instance: &ServerInstance) -> OrchestratorResult<()> {
        if instance.status.is_start_blocked() {
            return Err(OrchestratorError::Conflict(format!(
                "instance {} is {}, stop it before deprovisioning",
                instance.id, instance.status
            )));
        }
        let names = ResourceNames::for_instance(instance.id);
        tracing::info!(instance_id = instance.id, "deprovisioning instance resources");
        self.containers.remove(&names.container).await?;
        self.volumes.remove_volume_pair(&names.data_volume).await?;
        Ok(())
    }

    /// Begin starting an instance. Validates synchronously, persists
    /// `starting`, and spawns the background task.
    pub async fn start(&self, id: u64) -> OrchestratorResult<LifecycleTicket> {
        let instance = self.instance(id).await?;
        if instance.status.is_start_blocked() {
            return Err(OrchestratorError::Conflict(format!(
                "instance {} is already {}",
                id, instance.status
            )));
        }
        self.store.update_status(id, InstanceStatus::Starting).await?;
        let mut instance = instance;
        instance.status = InstanceStatus::Starting;
        Ok(self.lifecycle.spawn_start(instance))
    }

    /// Begin stopping an instance. Validates synchronously, persists
    /// `stopping`, and spawns the background task.
    pub async fn stop(&self, id: u64) -> OrchestratorResult<LifecycleTicket> {
        let instance = self.instance(id).await?;
        if instance.status.is_stop_blocked() {
            return Err(OrchestratorError::Conflict(format!(
                "instance {} is already {}",
                id, instance.status
            )));
        }
        self.store.update_status(id, InstanceStatus::Stopping).await?;
        let mut instance = instance;
        instance.status = InstanceStatus::Stopping;
        Ok(self.lifecycle.spawn_stop(instance))
    }

    /// Run a shell command inside an instance's container.
    pub async fn exec_command(&self, id: u64, command: &str) -> OrchestratorResult<String> {
        let instance = self.instance(id).await?;
        let names = ResourceNames::for_instance(instance.id);
        self.containers.exec(&names.container, command).await
    }

    /// Read one of the instance's config files.
    pub async fn read_config(&self, id: u64, file_name: &str) -> OrchestratorResult<String> {
        validate_config_file_name(file_name)?;
        self.instance(id).await?;
        self.config_io.read_file(id, file_name).await
    }

    /// Overwrite one of the instance's config files.
    pub async fn write_config(
        &self,
        id: u64,
        file_name: &str,
        content: &str,
    ) -> OrchestratorResult<()> {
        validate_config_file_name(file_name)?;
        self.instance(id).await?;
        self.config_io.write_file(id, file_name, content).await
    }

    /// Size of an instance's save volume.
    pub async fn folder_info(&self, id: u64) -> OrchestratorResult<FolderInfo> {
        self.instance(id).await?;
        self.config_io.folder_info(id).await
    }

    /// Pull every required image missing from the host.
    pub async fn ensure_required_images(&self) -> OrchestratorResult<()> {
        self.images.ensure_required_images().await
    }

    /// Names of required images missing from the host.
    pub async fn validate_required_images(&self) -> OrchestratorResult<Vec<String>> {
        self.images.validate_required_images().await
    }

    /// Status of one image.
    pub async fn image_status(&self, name: &str) -> OrchestratorResult<ImageStatus> {
        self.images.status(name).await
    }

    /// Fleet-wide image readiness report.
    pub async fn image_fleet_status(&self) -> OrchestratorResult<FleetImageStatus> {
        self.images.fleet_status().await
    }

    /// Pull one image, tracking per-layer progress.
    pub async fn pull_image(&self, name: &str) -> OrchestratorResult<()> {
        self.images.pull_with_progress(name).await
    }

    /// Poll until an image is present.
    pub async fn wait_for_image(&self, name: &str, deadline: Duration) -> OrchestratorResult<()> {
        self.images.wait_for_image(name, deadline).await
    }

    /// Reconcile persisted records against live Docker state.
    ///
    /// A daemon ping precedes the sweep; a dead daemon aborts it before
    /// any record is touched.
    pub async fn reconcile(&self) -> OrchestratorResult<ReconcileReport> {
        self.client.ping().await?;
        self.reconciler.run().await
    }
}

/// Only the two known INI files are addressable.
fn validate_config_file_name(file_name: &str) -> OrchestratorResult<()> {
    if file_name == GAME_USER_SETTINGS_FILE || file_name == GAME_INI_FILE {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(format!(
            "unsupported config file: {}",
            file_name
        )))
    }
}
