//! Docker Engine integration.
//!
//! One `DockerClient` is created at orchestrator construction and shared by
//! every component. The submodules each own one concern: volumes, images,
//! the workload container, and config-file transport through helper
//! containers.

pub mod config_files;
pub mod container;
pub mod images;
pub mod volumes;

use std::sync::Arc;

use bollard::Docker;

use crate::errors::OrchestratorResult;

/// Image running the actual game server workload.
pub const WORKLOAD_IMAGE: &str = "tbro98/ase-server:latest";

/// Small image for short-lived helper containers (config I/O, du).
pub const HELPER_IMAGE: &str = "alpine:latest";

/// Mount point of the data volume inside the workload container.
pub const SAVE_DIR_MOUNT: &str = "/home/steam/arkserver/ShooterGame/Saved";

/// Mount point of the plugins volume inside the workload container.
pub const PLUGINS_MOUNT: &str =
    "/home/steam/arkserver/ShooterGame/Binaries/Win64/ArkApi/Plugins";

/// Shared handle to the Docker daemon.
///
/// Thin wrapper around `bollard::Docker` so components take one concrete
/// type and connection policy lives in a single place.
#[derive(Clone)]
pub struct DockerClient {
    inner: Arc<Docker>,
}

impl DockerClient {
    /// Connect via the platform's local defaults (unix socket or named
    /// pipe) and negotiate the API version with the daemon.
    pub async fn connect() -> OrchestratorResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        let docker = docker.negotiate_version().await?;
        Ok(Self {
            inner: Arc::new(docker),
        })
    }

    /// Wrap an existing connection (tests, custom transports).
    pub fn from_docker(docker: Docker) -> Self {
        Self {
            inner: Arc::new(docker),
        }
    }

    /// Liveness check against the daemon.
    pub async fn ping(&self) -> OrchestratorResult<()> {
        self.inner.ping().await?;
        Ok(())
    }

    /// Raw bollard handle for the component modules.
    pub(crate) fn api(&self) -> &Docker {
        &self.inner
    }
}
