//! Image readiness and pull progress tracking.
//!
//! A pull moves an image through absent -> pulling -> ready (or error).
//! While a pull runs, per-layer progress lives in a `PullRegistry`; the
//! entry is cleared when the pull ends, so "pulling" is exactly "has a
//! registry entry". Readiness is always re-derived from the daemon, which
//! keeps the snapshot eventually consistent and never `pulling && ready`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::Serialize;

use crate::docker::{DockerClient, HELPER_IMAGE, WORKLOAD_IMAGE};
use crate::errors::{OrchestratorError, OrchestratorResult, docker_not_found};
use crate::util::wait::{POLL_INTERVAL, poll_until};

/// Default readiness-wait cap.
pub const IMAGE_WAIT: Duration = Duration::from_secs(30);

/// Longer cap for the multi-gigabyte workload image.
pub const WORKLOAD_IMAGE_WAIT: Duration = Duration::from_secs(60);

/// Images the engine requires on the host.
pub const REQUIRED_IMAGES: &[&str] = &[WORKLOAD_IMAGE, HELPER_IMAGE];

/// Phase of one image layer during a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerPhase {
    Pending,
    Downloading,
    Extracting,
    Verifying,
    Complete,
}

/// Progress of one layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerProgress {
    /// Total bytes for the current phase, when the daemon reports it.
    pub size: i64,
    /// Bytes processed in the current phase.
    pub progress: i64,
    pub phase: LayerPhase,
}

/// Snapshot of an in-flight pull.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PullProgress {
    /// Per-layer progress keyed by layer ID.
    pub layers: BTreeMap<String, LayerProgress>,
    /// Layer most recently reported in a non-terminal phase.
    pub current_layer: Option<String>,
}

/// Point-in-time status of one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageStatus {
    pub name: String,
    /// Image is present on the host, regardless of any pull in flight.
    pub exists: bool,
    pub ready: bool,
    pub pulling: bool,
    /// Layer currently being worked on, while a pull is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_layer: Option<String>,
    /// Present only while a pull is in flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<PullProgress>,
}

/// Fleet-wide image report.
#[derive(Debug, Clone, Serialize)]
pub struct FleetImageStatus {
    pub images: Vec<ImageStatus>,
    pub all_ready: bool,
    pub any_pulling: bool,
    pub pulling_count: usize,
    pub total: usize,
}

/// In-process registry of in-flight pulls.
///
/// One instance is shared by all components; presence of an entry is the
/// pull-in-progress guard, so a second pull of the same image is rejected
/// at `begin`.
#[derive(Default)]
pub struct PullRegistry {
    pulls: RwLock<BTreeMap<String, PullProgress>>,
}

impl PullRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim an image for pulling. Returns false when a pull is already
    /// in flight.
    pub fn begin(&self, image: &str) -> bool {
        let mut pulls = self.pulls.write();
        if pulls.contains_key(image) {
            return false;
        }
        pulls.insert(image.to_string(), PullProgress::default());
        true
    }

    /// Record layer progress for an in-flight pull.
    pub fn update_layer(&self, image: &str, layer_id: &str, update: LayerProgress) {
        let mut pulls = self.pulls.write();
        if let Some(progress) = pulls.get_mut(image) {
            if update.phase == LayerPhase::Complete {
                if progress.current_layer.as_deref() == Some(layer_id) {
                    progress.current_layer = None;
                }
            } else {
                progress.current_layer = Some(layer_id.to_string());
            }
            progress.layers.insert(layer_id.to_string(), update);
        }
    }

    /// Drop the registry entry; the pull is over regardless of outcome.
    pub fn finish(&self, image: &str) {
        self.pulls.write().remove(image);
    }

    pub fn is_pulling(&self, image: &str) -> bool {
        self.pulls.read().contains_key(image)
    }

    pub fn snapshot(&self, image: &str) -> Option<PullProgress> {
        self.pulls.read().get(image).cloned()
    }
}

/// Image operations needed by lifecycle, provisioning, and the embedder's
/// status surface.
#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Whether the image is present on the host.
    async fn image_exists(&self, name: &str) -> OrchestratorResult<bool>;

    /// Pull an image, streaming layer progress into the registry.
    async fn pull_with_progress(&self, name: &str) -> OrchestratorResult<()>;

    /// Snapshot of one image's readiness and pull progress.
    async fn status(&self, name: &str) -> OrchestratorResult<ImageStatus>;

    /// Poll until the image is present or the deadline elapses.
    async fn wait_for_image(&self, name: &str, deadline: Duration) -> OrchestratorResult<()>;

    /// Pull every required image not already present, in parallel.
    async fn ensure_required_images(&self) -> OrchestratorResult<()>;

    /// Names of required images missing from the host.
    async fn validate_required_images(&self) -> OrchestratorResult<Vec<String>>;

    /// Status of every required image plus fleet aggregates.
    async fn fleet_status(&self) -> OrchestratorResult<FleetImageStatus>;
}

/// Docker-backed image tracker.
pub struct ImagePullTracker {
    client: DockerClient,
    registry: Arc<PullRegistry>,
}

impl ImagePullTracker {
    pub fn new(client: DockerClient, registry: Arc<PullRegistry>) -> Self {
        Self { client, registry }
    }

    pub fn registry(&self) -> &Arc<PullRegistry> {
        &self.registry
    }
}

/// Map the daemon's human-readable pull status onto a layer phase.
fn parse_layer_phase(status: &str) -> Option<LayerPhase> {
    match status {
        "Pulling fs layer" | "Waiting" => Some(LayerPhase::Pending),
        "Downloading" => Some(LayerPhase::Downloading),
        "Verifying Checksum" => Some(LayerPhase::Verifying),
        "Extracting" => Some(LayerPhase::Extracting),
        "Download complete" | "Pull complete" | "Already exists" => Some(LayerPhase::Complete),
        _ => None,
    }
}

#[async_trait]
impl ImageOps for ImagePullTracker {
    async fn image_exists(&self, name: &str) -> OrchestratorResult<bool> {
        match self.client.api().inspect_image(name).await {
            Ok(_) => Ok(true),
            Err(err) if docker_not_found(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn pull_with_progress(&self, name: &str) -> OrchestratorResult<()> {
        if !self.registry.begin(name) {
            return Err(OrchestratorError::Conflict(format!(
                "image {} is already being pulled",
                name
            )));
        }
        tracing::info!(image = %name, "pulling image");

        let mut stream = self.client.api().create_image(
            Some(CreateImageOptions {
                from_image: name.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        let mut result = Ok(());
        while let Some(event) = stream.next().await {
            let info = match event {
                Ok(info) => info,
                Err(err) => {
                    result = Err(err.into());
                    break;
                }
            };
            let (Some(layer_id), Some(status)) = (info.id, info.status) else {
                continue;
            };
            let Some(phase) = parse_layer_phase(&status) else {
                continue;
            };
            let detail = info.progress_detail.unwrap_or_default();
            self.registry.update_layer(
                name,
                &layer_id,
                LayerProgress {
                    size: detail.total.unwrap_or(0),
                    progress: detail.current.unwrap_or(0),
                    phase,
                },
            );
        }

        // Entry removal is what flips the image out of `pulling`.
        self.registry.finish(name);
        match &result {
            Ok(()) => tracing::info!(image = %name, "image pull complete"),
            Err(err) => tracing::error!(image = %name, error = %err, "image pull failed"),
        }
        result
    }

    async fn status(&self, name: &str) -> OrchestratorResult<ImageStatus> {
        // Read the registry first: if the pull finishes between the two
        // reads the image shows ready, never pulling && ready.
        let progress = self.registry.snapshot(name);
        let pulling = progress.is_some();
        let exists = self.image_exists(name).await?;
        Ok(ImageStatus {
            name: name.to_string(),
            exists,
            ready: exists && !pulling,
            pulling,
            current_layer: progress.as_ref().and_then(|p| p.current_layer.clone()),
            progress,
        })
    }

    async fn wait_for_image(&self, name: &str, deadline: Duration) -> OrchestratorResult<()> {
        poll_until(&format!("image {}", name), deadline, POLL_INTERVAL, || async move {
            self.image_exists(name).await
        })
        .await
    }

    async fn ensure_required_images(&self) -> OrchestratorResult<()> {
        let pulls = REQUIRED_IMAGES.iter().map(|name| async move {
            if self.image_exists(name).await? {
                tracing::debug!(image = %name, "image already present");
                return Ok(());
            }
            self.pull_with_progress(name).await
        });

        let failures: Vec<String> = futures::future::join_all(pulls)
            .await
            .into_iter()
            .zip(REQUIRED_IMAGES)
            .filter_map(|(result, name)| result.err().map(|e| format!("{}: {}", name, e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Internal(format!(
                "failed to ensure required images: {}",
                failures.join("; ")
            )))
        }
    }

    async fn validate_required_images(&self) -> OrchestratorResult<Vec<String>> {
        let mut missing = Vec::new();
        for name in REQUIRED_IMAGES {
            if !self.image_exists(name).await? {
                missing.push(name.to_string());
            }
        }
        Ok(missing)
    }

    async fn fleet_status(&self) -> OrchestratorResult<FleetImageStatus> {
        let mut images = Vec::with_capacity(REQUIRED_IMAGES.len());
        for name in REQUIRED_IMAGES {
            images.push(self.status(name).await?);
        }
        let pulling_count = images.iter().filter(|s| s.pulling).count();
        Ok(FleetImageStatus {
            all_ready: images.iter().all(|s| s.ready),
            any_pulling: pulling_count > 0,
            pulling_count,
            total: images.len(),
            images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_begin_is_exclusive() {
        let registry = PullRegistry::new();
        assert!(registry.begin("img"));
        assert!(!registry.begin("img"));
        registry.finish("img");
        assert!(registry.begin("img"));
    }

    #[test]
    fn test_registry_tracks_layers_only_while_pulling() {
        let registry = PullRegistry::new();
        registry.update_layer(
            "img",
            "aa",
            LayerProgress {
                size: 10,
                progress: 1,
                phase: LayerPhase::Downloading,
            },
        );
        // No begin, no entry.
        assert!(registry.snapshot("img").is_none());

        registry.begin("img");
        registry.update_layer(
            "img",
            "aa",
            LayerProgress {
                size: 10,
                progress: 5,
                phase: LayerPhase::Downloading,
            },
        );
        let snapshot = registry.snapshot("img").unwrap();
        assert_eq!(snapshot.layers["aa"].progress, 5);

        registry.finish("img");
        assert!(!registry.is_pulling("img"));
        assert!(registry.snapshot("img").is_none());
    }

    #[test]
    fn test_layer_phase_mapping() {
        assert_eq!(parse_layer_phase("Pulling fs layer"), Some(LayerPhase::Pending));
        assert_eq!(parse_layer_phase("Downloading"), Some(LayerPhase::Downloading));
        assert_eq!(parse_layer_phase("Verifying Checksum"), Some(LayerPhase::Verifying));
        assert_eq!(parse_layer_phase("Extracting"), Some(LayerPhase::Extracting));
        // Every "complete" status is terminal for its layer.
        assert_eq!(parse_layer_phase("Download complete"), Some(LayerPhase::Complete));
        assert_eq!(parse_layer_phase("Pull complete"), Some(LayerPhase::Complete));
        assert_eq!(parse_layer_phase("Already exists"), Some(LayerPhase::Complete));
        assert_eq!(parse_layer_phase("Status: Downloaded newer image"), None);
    }

    #[test]
    fn test_registry_tracks_current_layer() {
        let registry = PullRegistry::new();
        registry.begin("img");

        registry.update_layer(
            "img",
            "aa",
            LayerProgress {
                size: 10,
                progress: 2,
                phase: LayerPhase::Downloading,
            },
        );
        assert_eq!(
            registry.snapshot("img").unwrap().current_layer.as_deref(),
            Some("aa")
        );

        // A second active layer takes over as current.
        registry.update_layer(
            "img",
            "bb",
            LayerProgress {
                size: 5,
                progress: 1,
                phase: LayerPhase::Extracting,
            },
        );
        assert_eq!(
            registry.snapshot("img").unwrap().current_layer.as_deref(),
            Some("bb")
        );

        // Completing the current layer clears the indicator.
        registry.update_layer(
            "img",
            "bb",
            LayerProgress {
                size: 5,
                progress: 5,
                phase: LayerPhase::Complete,
            },
        );
        assert_eq!(registry.snapshot("img").unwrap().current_layer, None);
    }
}
