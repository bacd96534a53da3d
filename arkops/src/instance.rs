//! Instance model shared with the persistence collaborator.
//!
//! The record store owns these rows; the engine receives a `ServerInstance`
//! by value per call and writes back only the `status` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::launch_args::LaunchArgs;

/// Persisted lifecycle status of an instance.
///
/// Transitions: `stopped -> starting -> {running | stopped}` and
/// `running -> stopping -> stopped`. A transitional status is written
/// optimistically before background work starts and is always resolved to
/// `running` or `stopped` when the task terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopping => "stopping",
        }
    }

    /// True while a background start task may be working on the instance.
    pub fn is_start_blocked(&self) -> bool {
        matches!(self, InstanceStatus::Running | InstanceStatus::Starting)
    }

    /// True while a background stop task may be working on the instance.
    pub fn is_stop_blocked(&self) -> bool {
        matches!(self, InstanceStatus::Stopped | InstanceStatus::Stopping)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One managed game-server tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    pub id: u64,
    /// Human-chosen unique identifier, validated upstream.
    pub identifier: String,
    /// Session name advertised by the game server.
    pub session_name: String,
    /// Optional cluster membership.
    #[serde(default)]
    pub cluster_id: String,
    pub port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub admin_password: String,
    pub map_name: String,
    pub max_players: u32,
    /// Comma-joined workshop mod IDs; empty string when none.
    #[serde(default)]
    pub mod_ids: String,
    pub auto_restart: bool,
    pub status: InstanceStatus,
    /// Launch-args payload; regenerated into a string for the container env.
    #[serde(default)]
    pub launch_args: LaunchArgs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerInstance {
    /// Generate the full launch-argument string for this instance.
    ///
    /// Used both when declaring the container env and when comparing a live
    /// container's recorded env for drift, so it must be deterministic.
    pub fn generate_args_string(&self) -> String {
        self.launch_args.generate(self)
    }
}

#[cfg(test)]
pub(crate) fn test_instance(id: u64) -> ServerInstance {
    let now = Utc::now();
    ServerInstance {
        id,
        identifier: format!("test-{}", id),
        session_name: format!("Test Server {}", id),
        cluster_id: String::new(),
        port: 7777,
        query_port: 27015,
        rcon_port: 32330,
        admin_password: "hunter2".into(),
        map_name: "TheIsland".into(),
        max_players: 70,
        mod_ids: String::new(),
        auto_restart: true,
        status: InstanceStatus::Stopped,
        launch_args: LaunchArgs::default(),
        created_at: now,
        updated_at: now,
    }
}
