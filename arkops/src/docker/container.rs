//! Workload container lifecycle.
//!
//! One container per instance, named `ase-server-<id>`, wired to the
//! instance's volume pair and host ports. Creation is destructively
//! idempotent: a pre-existing container under the name is force-removed
//! first, so the declared spec always wins.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    ContainerStateStatusEnum, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use futures::StreamExt;
use serde::Serialize;

use crate::docker::{DockerClient, PLUGINS_MOUNT, SAVE_DIR_MOUNT, WORKLOAD_IMAGE};
use crate::errors::{OrchestratorError, OrchestratorResult, docker_not_found};
use crate::instance::ServerInstance;
use crate::naming::ResourceNames;

/// Graceful stop window before the daemon kills the process.
const STOP_TIMEOUT_SECS: i64 = 30;

/// Observed container state, reduced to what the lifecycle machine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Starting,
    Unknown,
    NotFound,
}

/// Everything needed to declare an instance's container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub data_volume: String,
    pub plugins_volume: String,
    pub game_port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub args_string: String,
    pub mod_ids: String,
    pub auto_restart: bool,
}

impl ContainerSpec {
    /// Build the spec for an instance from its record and derived names.
    pub fn for_instance(instance: &ServerInstance, names: &ResourceNames) -> Self {
        Self {
            name: names.container.clone(),
            image: WORKLOAD_IMAGE.to_string(),
            data_volume: names.data_volume.clone(),
            plugins_volume: names.plugins_volume.clone(),
            game_port: instance.port,
            query_port: instance.query_port,
            rcon_port: instance.rcon_port,
            args_string: instance.generate_args_string(),
            mod_ids: instance.mod_ids.clone(),
            auto_restart: instance.auto_restart,
        }
    }

    /// Host ports the container binds, 1:1 with the container side.
    fn ports(&self) -> [u16; 4] {
        [
            self.game_port,
            self.game_port + 1,
            self.query_port,
            self.rcon_port,
        ]
    }

    fn env(&self) -> Vec<String> {
        let mut env = vec![
            "TZ=Asia/Shanghai".to_string(),
            format!("SERVER_ARGS={}", self.args_string),
        ];
        if !self.mod_ids.is_empty() {
            env.push(format!("GameModIds={}", self.mod_ids));
        }
        env
    }

    fn to_config(&self) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in self.ports() {
            for proto in ["udp", "tcp"] {
                let key = format!("{}/{}", port, proto);
                exposed_ports.insert(key.clone(), HashMap::new());
                port_bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(port.to_string()),
                    }]),
                );
            }
        }

        let restart_policy = if self.auto_restart {
            RestartPolicyNameEnum::UNLESS_STOPPED
        } else {
            RestartPolicyNameEnum::NO
        };

        Config {
            image: Some(self.image.clone()),
            env: Some(self.env()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                binds: Some(vec![
                    format!("{}:{}", self.data_volume, SAVE_DIR_MOUNT),
                    format!("{}:{}", self.plugins_volume, PLUGINS_MOUNT),
                ]),
                port_bindings: Some(port_bindings),
                restart_policy: Some(RestartPolicy {
                    name: Some(restart_policy),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Container operations needed by the lifecycle machine and reconciliation.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    /// Create the container from a spec, replacing any same-named one.
    async fn create(&self, spec: &ContainerSpec) -> OrchestratorResult<()>;

    async fn start(&self, name: &str) -> OrchestratorResult<()>;

    /// Graceful stop with a 30 s window. Stopping an absent or already
    /// stopped container is success.
    async fn stop(&self, name: &str) -> OrchestratorResult<()>;

    /// Best-effort stop, then force remove. Removing an absent container
    /// is success.
    async fn remove(&self, name: &str) -> OrchestratorResult<()>;

    async fn exists(&self, name: &str) -> OrchestratorResult<bool>;

    async fn status(&self, name: &str) -> OrchestratorResult<ContainerStatus>;

    /// Environment of a container as `KEY=VALUE` pairs parsed into a map.
    async fn env_vars(&self, name: &str) -> OrchestratorResult<HashMap<String, String>>;

    /// Run `sh -c <command>` inside a running container and capture
    /// combined output. Non-zero exit is an error that still carries the
    /// output.
    async fn exec(&self, name: &str, command: &str) -> OrchestratorResult<String>;
}

/// Docker-backed container runtime.
pub struct ContainerRuntime {
    client: DockerClient,
}

impl ContainerRuntime {
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContainerOps for ContainerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> OrchestratorResult<()> {
        // The declared spec wins over whatever is currently squatting on
        // the name.
        if self.exists(&spec.name).await? {
            tracing::info!(container = %spec.name, "removing pre-existing container");
            self.remove(&spec.name).await?;
        }

        self.client
            .api()
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                spec.to_config(),
            )
            .await?;
        tracing::info!(container = %spec.name, image = %spec.image, "created container");
        Ok(())
    }

    async fn start(&self, name: &str) -> OrchestratorResult<()> {
        self.client
            .api()
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        tracing::info!(container = %name, "started container");
        Ok(())
    }

    async fn stop(&self, name: &str) -> OrchestratorResult<()> {
        match self
            .client
            .api()
            .stop_container(name, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await
        {
            Ok(()) => {
                tracing::info!(container = %name, "stopped container");
                Ok(())
            }
            Err(err) if docker_not_found(&err) => Ok(()),
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, name: &str) -> OrchestratorResult<()> {
        if let Err(err) = self.stop(name).await {
            tracing::warn!(container = %name, error = %err, "stop before remove failed");
        }
        match self
            .client
            .api()
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(container = %name, "removed container");
                Ok(())
            }
            Err(err) if docker_not_found(&err) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, name: &str) -> OrchestratorResult<bool> {
        Ok(self.status(name).await? != ContainerStatus::NotFound)
    }

    async fn status(&self, name: &str) -> OrchestratorResult<ContainerStatus> {
        let inspect = match self
            .client
            .api()
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(err) if docker_not_found(&err) => return Ok(ContainerStatus::NotFound),
            Err(err) => return Err(err.into()),
        };

        let Some(state) = inspect.state else {
            return Ok(ContainerStatus::Unknown);
        };
        if state.running == Some(true) {
            return Ok(ContainerStatus::Running);
        }
        Ok(match state.status {
            Some(ContainerStateStatusEnum::EXITED) | Some(ContainerStateStatusEnum::CREATED) => {
                ContainerStatus::Stopped
            }
            Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Starting,
            _ => ContainerStatus::Unknown,
        })
    }

    async fn env_vars(&self, name: &str) -> OrchestratorResult<HashMap<String, String>> {
        let inspect = self
            .client
            .api()
            .inspect_container(name, None::<InspectContainerOptions>)
            .await?;
        let env = inspect.config.and_then(|c| c.env).unwrap_or_default();
        Ok(env
            .iter()
            .filter_map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect())
    }

    async fn exec(&self, name: &str, command: &str) -> OrchestratorResult<String> {
        let exec = self
            .client
            .api()
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } =
            self.client.api().start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = stream.next().await {
                output.push_str(&chunk?.to_string());
            }
        }

        let inspect = self.client.api().inspect_exec(&exec.id).await?;
        match inspect.exit_code {
            Some(0) | None => Ok(output),
            Some(code) => Err(OrchestratorError::CommandFailed {
                exit_code: code,
                output,
            }),
        }
    }
}

/// Collect a container's combined stdout/stderr logs.
pub(crate) async fn collect_logs(client: &DockerClient, name: &str) -> OrchestratorResult<String> {
    let mut stream = client.api().logs(
        name,
        Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );
    let mut output = String::new();
    while let Some(chunk) = stream.next().await {
        output.push_str(&chunk?.to_string());
    }
    Ok(output)
}
