//! Docker orchestration engine for ARK: Survival Evolved game servers.
//!
//! Each tenant instance maps onto three Docker resources with
//! deterministically derived names: a workload container, a data volume
//! (world saves and config files), and a plugins volume. The engine covers:
//! - volume-pair and container provisioning with rollback on partial failure
//! - an image pull state machine with per-layer progress tracking
//! - config file I/O through ephemeral helper containers
//! - an async start/stop lifecycle that detects and repairs drift between
//!   the persisted record and the live container
//! - a startup reconciliation sweep where live Docker state wins
//!
//! [`Orchestrator`] is the entry point; the component seams
//! ([`docker::container::ContainerOps`], [`docker::volumes::VolumeOps`],
//! [`docker::images::ImageOps`], [`docker::config_files::ConfigIo`],
//! [`store::InstanceStore`]) are traits so embedders and tests can swap
//! the Docker-facing pieces.

pub mod config;
pub mod docker;
pub mod errors;
pub mod instance;
pub mod launch_args;
pub mod lifecycle;
pub mod logging;
pub mod naming;
pub mod reconcile;
pub mod rollback;
pub mod runtime;
pub mod store;
pub mod util;

pub use errors::{OrchestratorError, OrchestratorResult};
pub use instance::{InstanceStatus, ServerInstance};
pub use launch_args::{LaunchArgs, SwitchValue};
pub use lifecycle::{LifecyclePhase, LifecycleTicket};
pub use logging::init_logging;
pub use naming::ResourceNames;
pub use reconcile::ReconcileReport;
pub use runtime::Orchestrator;
pub use store::{InstanceStore, MemoryStore};
