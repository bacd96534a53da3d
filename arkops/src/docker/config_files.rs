//! Config file I/O through ephemeral helper containers.
//!
//! The INI files live inside the data volume, which only Docker can see.
//! Reads and writes go through a short-lived alpine container with the
//! volume mounted, using the container archive API: writes upload a tar
//! stream whose directory entries create `Config/WindowsServer/` in
//! passing, reads download a tar stream and un-tar it in memory. The
//! helper is force-removed on every path, success or not.

use std::io::Read;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, RemoveContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use serde::Serialize;

use crate::config::{CONFIG_SUBDIR, config_file_path};
use crate::docker::container::collect_logs;
use crate::docker::{DockerClient, HELPER_IMAGE};
use crate::errors::{OrchestratorError, OrchestratorResult, docker_not_found};
use crate::naming;

/// Mount point of the data volume inside a helper container.
const HELPER_MOUNT: &str = "/data";

/// Size report for an instance's save volume.
#[derive(Debug, Clone, Serialize)]
pub struct FolderInfo {
    pub size_bytes: u64,
}

/// Config-file operations backed by the data volume.
#[async_trait]
pub trait ConfigIo: Send + Sync {
    /// Read one config file. `NotFound` when the file does not exist.
    async fn read_file(&self, instance_id: u64, file_name: &str) -> OrchestratorResult<String>;

    /// Write one config file, creating parent directories as needed.
    async fn write_file(
        &self,
        instance_id: u64,
        file_name: &str,
        content: &str,
    ) -> OrchestratorResult<()>;

    /// Total size of the instance's save volume.
    async fn folder_info(&self, instance_id: u64) -> OrchestratorResult<FolderInfo>;
}

/// Docker-backed config bridge.
pub struct ConfigFileBridge {
    client: DockerClient,
}

impl ConfigFileBridge {
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }

    /// Fail fast when the helper image is missing instead of letting the
    /// container create produce a confusing pull error.
    async fn check_helper_image(&self) -> OrchestratorResult<()> {
        match self.client.api().inspect_image(HELPER_IMAGE).await {
            Ok(_) => Ok(()),
            Err(err) if docker_not_found(&err) => Err(OrchestratorError::MissingImages(vec![
                HELPER_IMAGE.to_string(),
            ])),
            Err(err) => Err(err.into()),
        }
    }

    /// Create (without starting) a helper container with the data volume
    /// mounted. The archive API works on created containers.
    async fn create_helper(
        &self,
        instance_id: u64,
        cmd: Vec<String>,
    ) -> OrchestratorResult<String> {
        self.check_helper_image().await?;

        let data_volume = naming::data_volume_name(instance_id);
        let name = format!(
            "ase-helper-{}-{}",
            instance_id,
            chrono::Utc::now().timestamp_millis()
        );
        self.client
            .api()
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(HELPER_IMAGE.to_string()),
                    cmd: Some(cmd),
                    host_config: Some(HostConfig {
                        binds: Some(vec![format!("{}:{}", data_volume, HELPER_MOUNT)]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await?;
        tracing::debug!(helper = %name, instance_id, "created helper container");
        Ok(name)
    }

    /// Force-remove a helper. Failures are logged, never propagated; a
    /// leaked helper is inert.
    async fn remove_helper(&self, name: &str) {
        let removed = self
            .client
            .api()
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        if let Err(err) = removed {
            if !docker_not_found(&err) {
                tracing::warn!(helper = %name, error = %err, "helper container removal failed");
            }
        }
    }

    async fn download_file(&self, helper: &str, file_name: &str) -> OrchestratorResult<String> {
        let path = format!("{}/{}", HELPER_MOUNT, config_file_path(file_name));
        let mut stream = self.client.api().download_from_container(
            helper,
            Some(DownloadFromContainerOptions { path }),
        );

        let mut archive_bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) if docker_not_found(&err) => {
                    return Err(OrchestratorError::NotFound(format!(
                        "config file {}",
                        file_name
                    )));
                }
                Err(err) => return Err(err.into()),
            };
            archive_bytes.extend_from_slice(&chunk);
        }

        let mut archive = tar::Archive::new(archive_bytes.as_slice());
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_file() {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                return Ok(content);
            }
        }
        Err(OrchestratorError::NotFound(format!(
            "config file {}",
            file_name
        )))
    }

    async fn upload_file(
        &self,
        helper: &str,
        file_name: &str,
        content: &str,
    ) -> OrchestratorResult<()> {
        let archive = build_config_archive(file_name, content.as_bytes())?;
        self.client
            .api()
            .upload_to_container(
                helper,
                Some(UploadToContainerOptions {
                    path: HELPER_MOUNT.to_string(),
                    ..Default::default()
                }),
                bytes::Bytes::from(archive),
            )
            .await?;
        Ok(())
    }
}

/// Build a tar stream carrying one config file plus the directory entries
/// leading to it, so extraction needs no separate mkdir.
fn build_config_archive(file_name: &str, content: &[u8]) -> OrchestratorResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut dir = String::new();
    for part in CONFIG_SUBDIR.split('/') {
        dir.push_str(part);
        dir.push('/');
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder.append_data(&mut header, &dir, std::io::empty())?;
    }

    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_size(content.len() as u64);
    builder.append_data(&mut header, config_file_path(file_name), content)?;

    Ok(builder.into_inner()?)
}

/// Size in bytes from `du -sk` output. Busybox `du` has no byte flag, so
/// the helper reports KiB and we scale here.
fn parse_du_output(output: &str) -> OrchestratorResult<u64> {
    output
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<u64>().ok())
        .map(|kib| kib * 1024)
        .ok_or_else(|| {
            OrchestratorError::Internal(format!("unparseable du output: {:?}", output))
        })
}

#[async_trait]
impl ConfigIo for ConfigFileBridge {
    async fn read_file(&self, instance_id: u64, file_name: &str) -> OrchestratorResult<String> {
        let helper = self
            .create_helper(instance_id, vec!["true".to_string()])
            .await?;
        let result = self.download_file(&helper, file_name).await;
        self.remove_helper(&helper).await;
        result
    }

    async fn write_file(
        &self,
        instance_id: u64,
        file_name: &str,
        content: &str,
    ) -> OrchestratorResult<()> {
        let helper = self
            .create_helper(instance_id, vec!["true".to_string()])
            .await?;
        let result = self.upload_file(&helper, file_name, content).await;
        self.remove_helper(&helper).await;
        if result.is_ok() {
            tracing::info!(instance_id, file = %file_name, "wrote config file");
        }
        result
    }

    async fn folder_info(&self, instance_id: u64) -> OrchestratorResult<FolderInfo> {
        let cmd = vec![
            "du".to_string(),
            "-sk".to_string(),
            HELPER_MOUNT.to_string(),
        ];
        let helper = self.create_helper(instance_id, cmd).await?;

        let result = async {
            self.client
                .api()
                .start_container(&helper, None::<bollard::container::StartContainerOptions<String>>)
                .await?;

            let mut wait = self.client.api().wait_container(
                &helper,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            );
            while let Some(status) = wait.next().await {
                status?;
            }

            let output = collect_logs(&self.client, &helper).await?;
            parse_du_output(&output).map(|size_bytes| FolderInfo { size_bytes })
        }
        .await;

        self.remove_helper(&helper).await;
        result
    }
}
