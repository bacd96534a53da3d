//! Start/stop lifecycle tasks.
//!
//! Start and stop are asynchronous: the facade validates and persists the
//! transitional status synchronously, then spawns one task here. Each task
//! owns its own rollback log and publishes phase progress over a watch
//! channel; the persisted status always settles on `running` or `stopped`
//! when the task terminates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::docker::container::{ContainerOps, ContainerSpec, ContainerStatus};
use crate::docker::images::ImageOps;
use crate::docker::volumes::VolumeOps;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::instance::{InstanceStatus, ServerInstance};
use crate::naming::ResourceNames;
use crate::rollback::{Compensate, DockerCompensator, RollbackKind, RollbackManager};
use crate::store::InstanceStore;
use crate::util::wait::{POLL_INTERVAL, poll_until};

/// Cap on waiting for a container to reach its target state.
const CONTAINER_WAIT: Duration = Duration::from_secs(30);

/// Progress of an in-flight start or stop task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Pending,
    CheckingImages,
    InspectingContainer,
    CreatingContainer,
    StartingContainer,
    WaitingForRunning,
    Running,
    StoppingContainer,
    WaitingForStop,
    Stopped,
    Failed(String),
}

impl LifecyclePhase {
    /// True once the task has terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Running | LifecyclePhase::Stopped | LifecyclePhase::Failed(_)
        )
    }
}

/// Handle to a spawned lifecycle task.
pub struct LifecycleTicket {
    /// Live phase updates; the last value before the channel closes is the
    /// terminal phase.
    pub phase: watch::Receiver<LifecyclePhase>,
    /// Join handle of the task, mainly for tests and shutdown.
    pub task: JoinHandle<()>,
}

impl LifecycleTicket {
    /// Wait for the task to terminate and return the terminal phase.
    pub async fn finished(mut self) -> LifecyclePhase {
        // The sender dropping ends the loop; the borrow then holds the
        // final value.
        while !self.phase.borrow().is_terminal() {
            if self.phase.changed().await.is_err() {
                break;
            }
        }
        let phase = self.phase.borrow().clone();
        let _ = self.task.await;
        phase
    }
}

/// Shared collaborators for lifecycle tasks.
pub struct Lifecycle {
    containers: Arc<dyn ContainerOps>,
    volumes: Arc<dyn VolumeOps>,
    images: Arc<dyn ImageOps>,
    store: Arc<dyn InstanceStore>,
}

impl Lifecycle {
    pub fn new(
        containers: Arc<dyn ContainerOps>,
        volumes: Arc<dyn VolumeOps>,
        images: Arc<dyn ImageOps>,
        store: Arc<dyn InstanceStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            containers,
            volumes,
            images,
            store,
        })
    }

    fn compensator(&self) -> Arc<dyn Compensate> {
        Arc::new(DockerCompensator::new(
            self.containers.clone(),
            self.volumes.clone(),
        ))
    }

    /// Spawn the start task for an instance. The caller has already
    /// persisted `starting`.
    pub fn spawn_start(self: &Arc<Self>, instance: ServerInstance) -> LifecycleTicket {
        let (tx, rx) = watch::channel(LifecyclePhase::Pending);
        let lifecycle = self.clone();
        let task = tokio::spawn(async move {
            lifecycle.run_start(instance, tx).await;
        });
        LifecycleTicket { phase: rx, task }
    }

    /// Spawn the stop task for an instance. The caller has already
    /// persisted `stopping`.
    pub fn spawn_stop(self: &Arc<Self>, instance: ServerInstance) -> LifecycleTicket {
        let (tx, rx) = watch::channel(LifecyclePhase::Pending);
        let lifecycle = self.clone();
        let task = tokio::spawn(async move {
            lifecycle.run_stop(instance, tx).await;
        });
        LifecycleTicket { phase: rx, task }
    }

    async fn run_start(&self, instance: ServerInstance, tx: watch::Sender<LifecyclePhase>) {
        let id = instance.id;
        let mut rollback = RollbackManager::new(self.compensator());

        match self.start_steps(&instance, &tx, &mut rollback).await {
            Ok(()) => {
                rollback.clear();
                if let Err(err) = self.store.update_status(id, InstanceStatus::Running).await {
                    tracing::error!(instance_id = id, error = %err, "failed to persist running status");
                }
                let _ = tx.send(LifecyclePhase::Running);
                tracing::info!(instance_id = id, "instance started");
            }
            Err(err) => {
                tracing::error!(instance_id = id, error = %err, "start failed, rolling back");
                if let Err(rollback_err) = rollback.rollback().await {
                    tracing::error!(instance_id = id, error = %rollback_err, "rollback incomplete");
                }
                if let Err(store_err) = self.store.update_status(id, InstanceStatus::Stopped).await
                {
                    tracing::error!(instance_id = id, error = %store_err, "failed to persist stopped status");
                }
                let _ = tx.send(LifecyclePhase::Failed(err.to_string()));
            }
        }
    }

    async fn start_steps(
        &self,
        instance: &ServerInstance,
        tx: &watch::Sender<LifecyclePhase>,
        rollback: &mut RollbackManager,
    ) -> OrchestratorResult<()> {
        let names = ResourceNames::for_instance(instance.id);

        // Fail fast on missing images; starting never pulls implicitly.
        let _ = tx.send(LifecyclePhase::CheckingImages);
        let missing = self.images.validate_required_images().await?;
        if !missing.is_empty() {
            return Err(OrchestratorError::MissingImages(missing));
        }

        let _ = tx.send(LifecyclePhase::InspectingContainer);
        let mut needs_create = true;
        if self.containers.exists(&names.container).await? {
            if self.container_matches(instance, &names.container).await {
                needs_create = false;
            } else {
                tracing::info!(
                    instance_id = instance.id,
                    container = %names.container,
                    "container drifted from declared spec, recreating"
                );
                self.containers.remove(&names.container).await?;
            }
        }

        if needs_create {
            let _ = tx.send(LifecyclePhase::CreatingContainer);
            let spec = ContainerSpec::for_instance(instance, &names);
            self.containers.create(&spec).await?;
            rollback.add_action(
                RollbackKind::RemoveContainer,
                &names.container,
                format!("remove container {}", names.container),
            );
        }

        let _ = tx.send(LifecyclePhase::StartingContainer);
        self.containers.start(&names.container).await?;
        rollback.add_action(
            RollbackKind::StopContainer,
            &names.container,
            format!("stop container {}", names.container),
        );

        let _ = tx.send(LifecyclePhase::WaitingForRunning);
        let container = names.container.as_str();
        poll_until(
            &format!("container {} running", container),
            CONTAINER_WAIT,
            POLL_INTERVAL,
            || async move {
                Ok(self.containers.status(container).await? == ContainerStatus::Running)
            },
        )
        .await
    }

    /// Compare the live container's env against what the record declares.
    /// An unreadable env counts as drift; recreating is cheaper than
    /// guessing.
    async fn container_matches(&self, instance: &ServerInstance, container: &str) -> bool {
        let env = match self.containers.env_vars(container).await {
            Ok(env) => env,
            Err(err) => {
                tracing::warn!(
                    instance_id = instance.id,
                    error = %err,
                    "could not read container env, treating as drifted"
                );
                return false;
            }
        };
        env_matches(&env, instance)
    }

    async fn run_stop(&self, instance: ServerInstance, tx: watch::Sender<LifecyclePhase>) {
        let id = instance.id;
        let names = ResourceNames::for_instance(id);

        let _ = tx.send(LifecyclePhase::StoppingContainer);
        match self.containers.exists(&names.container).await {
            Ok(false) => {
                tracing::info!(instance_id = id, "no container to stop");
            }
            Ok(true) => {
                if let Err(err) = self.containers.stop(&names.container).await {
                    tracing::warn!(instance_id = id, error = %err, "container stop failed");
                }
                let _ = tx.send(LifecyclePhase::WaitingForStop);
                let container = names.container.as_str();
                let settled = poll_until(
                    &format!("container {} stopped", container),
                    CONTAINER_WAIT,
                    POLL_INTERVAL,
                    || async move {
                        Ok(matches!(
                            self.containers.status(container).await?,
                            ContainerStatus::Stopped | ContainerStatus::NotFound
                        ))
                    },
                )
                .await;
                if let Err(err) = settled {
                    tracing::warn!(instance_id = id, error = %err, "container did not settle");
                }
            }
            Err(err) => {
                tracing::warn!(instance_id = id, error = %err, "container inspect failed during stop");
            }
        }

        // Stop always converges the record to stopped.
        if let Err(err) = self.store.update_status(id, InstanceStatus::Stopped).await {
            tracing::error!(instance_id = id, error = %err, "failed to persist stopped status");
        }
        let _ = tx.send(LifecyclePhase::Stopped);
        tracing::info!(instance_id = id, "instance stopped");
    }
}

/// Whether a live env matches the instance's declared launch state.
fn env_matches(env: &HashMap<String, String>, instance: &ServerInstance) -> bool {
    if env.get("SERVER_ARGS").map(String::as_str) != Some(instance.generate_args_string().as_str())
    {
        return false;
    }
    let live_mods = env.get("GameModIds").map(String::as_str).unwrap_or("");
    live_mods == instance.mod_ids
}
