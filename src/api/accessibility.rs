//! API endpoints for accessibility settings and configuration pushes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Json};
use chrono::{Local, NaiveTime};
use futures::future::join_all;
use serde_json::Value;

use crate::accessibility::{AccessibilityProfiles, NodePayload, ProfilesError};

use super::routes::AppState;
use super::types::*;

fn profiles_error(e: ProfilesError) -> (StatusCode, String) {
    let status = match &e {
        ProfilesError::PresetNotFound(_) => StatusCode::NOT_FOUND,
        ProfilesError::InvalidQuietHours(_)
        | ProfilesError::QuietHoursShape(_)
        | ProfilesError::NotAMapping(_) => StatusCode::BAD_REQUEST,
        ProfilesError::Io(_) | ProfilesError::Yaml(_) | ProfilesError::Encode(_) => {
            tracing::error!("Accessibility profiles unavailable: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

/// Errors reading the stored file are never the caller's fault.
fn stored_profiles_error(e: ProfilesError) -> (StatusCode, String) {
    tracing::error!("Stored accessibility profiles are unusable: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn load_profiles(state: &AppState) -> Result<AccessibilityProfiles, (StatusCode, String)> {
    AccessibilityProfiles::load(&state.config.profiles_path).map_err(stored_profiles_error)
}

fn local_time() -> NaiveTime {
    Local::now().time()
}

/// Load, modify, and save the profiles under the profiles lock, then derive
/// payloads for `node_ids` from the saved result.
async fn update_profiles<F>(
    state: &AppState,
    node_ids: Vec<String>,
    modify: F,
) -> Result<BTreeMap<String, NodePayload>, (StatusCode, String)>
where
    F: FnOnce(&mut AccessibilityProfiles) -> Result<(), ProfilesError>,
{
    let _guard = state.profiles_lock.lock().await;
    let path = &state.config.profiles_path;
    let mut profiles = load_profiles(state)?;
    modify(&mut profiles).map_err(profiles_error)?;
    profiles.save(path).map_err(profiles_error)?;
    tracing::info!("Accessibility profiles updated at {}", path.display());
    Ok(profiles.runtime_payloads(node_ids.iter().map(String::as_str), local_time()))
}

/// Push each payload to its node concurrently, collecting per-node outcomes.
async fn broadcast(state: &AppState, payloads: BTreeMap<String, NodePayload>) -> BTreeMap<String, PushStatus> {
    let pushes = payloads.into_iter().map(|(node_id, payload)| async move {
        let result = match serde_json::to_value(&payload) {
            Ok(value) => state
                .hub
                .push_node_config(&node_id, value)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let status = match result {
            Ok(()) => PushStatus { ok: true, error: None },
            Err(error) => {
                tracing::warn!(node_id = %node_id, "Configuration push failed: {}", error);
                PushStatus {
                    ok: false,
                    error: Some(error),
                }
            }
        };
        (node_id, status)
    });
    join_all(pushes).await.into_iter().collect()
}

/// GET /api/accessibility
pub async fn get_profiles(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AccessibilityProfiles>, (StatusCode, String)> {
    let _guard = state.profiles_lock.lock().await;
    load_profiles(&state).map(Json)
}

/// POST /api/apply-preset
/// Apply a named preset and/or direct global values, then push to every node.
pub async fn apply_preset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApplyPresetRequest>,
) -> Result<Json<BroadcastResponse>, (StatusCode, String)> {
    let preset_name = req.preset_name.filter(|name| !name.trim().is_empty());
    if preset_name.is_none() && req.global.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Provide preset_name or global settings".to_string(),
        ));
    }

    let node_ids: Vec<String> = state.nodes.node_ids().map(str::to_string).collect();
    let payloads = update_profiles(&state, node_ids, |profiles| {
        if let Some(name) = preset_name.as_deref() {
            profiles.apply_preset(name)?;
            tracing::info!(preset = name, "Applied accessibility preset");
        }
        if let Some(global) = req.global {
            profiles.update_global(global)?;
        }
        Ok(())
    })
    .await?;

    let push = broadcast(&state, payloads).await;
    Ok(Json(BroadcastResponse { ok: true, push }))
}

/// POST /api/accessibility/override
/// Store per-node overrides and push the node's new payload.
pub async fn set_node_override(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NodeOverrideRequest>,
) -> Result<Json<BroadcastResponse>, (StatusCode, String)> {
    if !state.nodes.contains(&req.node_id) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Node {} not found", req.node_id),
        ));
    }

    let node_id = req.node_id;
    let overrides = req.overrides;
    let payloads = update_profiles(&state, vec![node_id.clone()], |profiles| {
        profiles.set_node_override(&node_id, overrides);
        Ok(())
    })
    .await?;

    let push = broadcast(&state, payloads).await;
    Ok(Json(BroadcastResponse { ok: true, push }))
}

/// POST /api/push-config
/// Send a raw configuration payload to one node.
pub async fn push_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PushConfigRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    if !state.nodes.contains(&req.node_id) {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Node {} not found", req.node_id),
        ));
    }

    state
        .hub
        .push_node_config(&req.node_id, req.payload)
        .await
        .map_err(|e| (e.status_code(), e.to_string()))?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "node_id": req.node_id
    })))
}
