//! Launch-argument payload and string generation.
//!
//! An instance carries a JSON payload of query parameters, switch
//! arguments, and free-form custom arguments. `generate` flattens the
//! payload plus the instance's base fields into the single string the
//! workload image consumes via `SERVER_ARGS`. The generated string is also
//! what drift detection compares against a live container's env, so
//! iteration order is fixed (sorted maps) and generation is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::instance::ServerInstance;

/// Value of a `-Key[=value]` switch argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SwitchValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// Launch-args payload stored on the instance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchArgs {
    /// `?Key=Value` query parameters appended after the base set.
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    /// `-Key` / `-Key=value` switch arguments.
    #[serde(default)]
    pub switch_args: BTreeMap<String, SwitchValue>,
    /// Verbatim extra arguments appended last.
    #[serde(default)]
    pub custom_args: Vec<String>,
}

/// Base query keys always derived from the instance record; payload entries
/// under these keys are ignored to avoid duplicates.
const BASE_QUERY_KEYS: &[&str] = &[
    "listen",
    "Port",
    "QueryPort",
    "MaxPlayers",
    "RCONEnabled",
    "RCONPort",
    "ServerAdminPassword",
    "SessionName",
    "GameModIds",
];

impl Default for LaunchArgs {
    /// Stock arguments applied to instances created without a payload.
    fn default() -> Self {
        let mut switch_args = BTreeMap::new();
        for flag in [
            "NoBattlEye",
            "servergamelog",
            "structurememopts",
            "UseStructureStasisGrid",
            "SecureSendArKPayload",
            "UseItemDupeCheck",
            "UseSecureSpawnRules",
            "nosteamclient",
            "game",
            "server",
            "log",
            "newsaveformat",
            "usestore",
        ] {
            switch_args.insert(flag.to_string(), SwitchValue::Bool(true));
        }
        switch_args.insert(
            "MinimumTimeBetweenInventoryRetrieval".to_string(),
            SwitchValue::Int(3600),
        );

        Self {
            query_params: BTreeMap::new(),
            switch_args,
            custom_args: Vec::new(),
        }
    }
}

impl LaunchArgs {
    /// Parse a payload from the JSON stored on the instance record.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }

    /// Serialize the payload for storage.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Generate the full argument string for an instance.
    ///
    /// Layout: `<map>?listen?Port=..?...` (query params joined without
    /// separators) then a space-joined run of switch arguments.
    pub fn generate(&self, instance: &ServerInstance) -> String {
        let mut query = vec![
            "?listen".to_string(),
            format!("?Port={}", instance.port),
            format!("?QueryPort={}", instance.query_port),
            format!("?MaxPlayers={}", instance.max_players),
            "?RCONEnabled=True".to_string(),
            format!("?RCONPort={}", instance.rcon_port),
            format!("?ServerAdminPassword={}", instance.admin_password),
        ];

        if !instance.session_name.is_empty() {
            query.push(format!("?SessionName={}", instance.session_name));
        }
        if !instance.mod_ids.is_empty() {
            query.push(format!("?GameModIds={}", instance.mod_ids));
        }

        for (key, value) in &self.query_params {
            if BASE_QUERY_KEYS.contains(&key.as_str()) {
                continue;
            }
            // Empty and explicitly false values are dropped entirely.
            if value.is_empty() || value.eq_ignore_ascii_case("false") {
                continue;
            }
            query.push(format!("?{}={}", key, value));
        }

        let mut switches = Vec::new();
        for (key, value) in &self.switch_args {
            match value {
                SwitchValue::Bool(true) => switches.push(format!("-{}", key)),
                SwitchValue::Bool(false) => {}
                SwitchValue::Int(0) => {}
                SwitchValue::Int(n) => switches.push(format!("-{}={}", key, n)),
                SwitchValue::Text(s) if s.is_empty() => {}
                SwitchValue::Text(s) => switches.push(format!("-{}={}", key, s)),
            }
        }
        if !instance.cluster_id.is_empty() {
            switches.push(format!("-clusterid={}", instance.cluster_id));
        }
        switches.extend(self.custom_args.iter().cloned());

        let mut result = instance.map_name.clone();
        result.push_str(&query.concat());
        if !switches.is_empty() {
            result.push(' ');
            result.push_str(&switches.join(" "));
        }
        result
    }
}
