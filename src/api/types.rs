//! Request and response bodies for the dashboard API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::accessibility::SettingsMap;
use crate::narrative::NarrativeSnapshot;
use crate::nodes::NodeRole;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApplyPresetRequest {
    #[serde(default)]
    pub preset_name: Option<String>,
    /// Values merged directly into the global settings.
    #[serde(default)]
    pub global: Option<SettingsMap>,
}

#[derive(Debug, Deserialize)]
pub struct NodeOverrideRequest {
    pub node_id: String,
    #[serde(default)]
    pub overrides: SettingsMap,
}

#[derive(Debug, Deserialize)]
pub struct PushConfigRequest {
    pub node_id: String,
    pub payload: Value,
}

/// Outcome of pushing configuration to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub ok: bool,
    pub push: BTreeMap<String, PushStatus>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub ok: bool,
    pub state: NarrativeSnapshot,
}

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Unix seconds of the last heartbeat, if the node is online.
    pub last_seen: Option<f64>,
}
