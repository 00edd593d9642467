//! Node runtime payloads derived from accessibility settings.
//!
//! The hub pushes a [`NodePayload`] to each node on its config topic. Manual
//! pushes from the dashboard may carry only part of it, so nodes parse the
//! topic as a [`NodeConfigUpdate`] and merge.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{quiet_hours, SettingsMap};

pub const DEFAULT_VOLUME: f64 = 0.7;
pub const SENSORY_FRIENDLY_VOLUME_CAP: f64 = 0.55;
pub const QUIET_HOURS_VOLUME_CAP: f64 = 0.45;
pub const DEFAULT_MOBILITY_BUFFER_MS: i64 = 800;
pub const MAX_MOBILITY_BUFFER_MS: i64 = 60_000;
pub const MAX_REPEAT: i64 = 2;
pub const MIN_PACE: f64 = 0.85;
pub const MAX_PACE: f64 = 1.15;
const SENSORY_FRIENDLY_PACE: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilitySettings {
    pub captions: bool,
    pub visual_pulse: bool,
    pub proximity_glow: bool,
    pub mobility_buffer_ms: u64,
    pub repeat: u32,
    pub pace: f64,
    pub safety_limiter: bool,
}

impl Default for AccessibilitySettings {
    fn default() -> Self {
        Self {
            captions: false,
            visual_pulse: false,
            proximity_glow: true,
            mobility_buffer_ms: DEFAULT_MOBILITY_BUFFER_MS as u64,
            repeat: 0,
            pace: 1.0,
            safety_limiter: true,
        }
    }
}

/// Full configuration payload for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub audio: AudioSettings,
    pub accessibility: AccessibilitySettings,
}

impl Default for NodePayload {
    fn default() -> Self {
        Self {
            audio: AudioSettings {
                volume: DEFAULT_VOLUME,
            },
            accessibility: AccessibilitySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioUpdate {
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessibilityUpdate {
    pub captions: Option<bool>,
    pub visual_pulse: Option<bool>,
    pub proximity_glow: Option<bool>,
    pub mobility_buffer_ms: Option<u64>,
    pub repeat: Option<u32>,
    pub pace: Option<f64>,
    pub safety_limiter: Option<bool>,
}

/// Partial payload accepted on a node's config topic.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfigUpdate {
    #[serde(default)]
    pub audio: Option<AudioUpdate>,
    #[serde(default)]
    pub accessibility: Option<AccessibilityUpdate>,
}

impl NodePayload {
    /// Merge a partial update, clamping values to the same bounds the hub uses.
    pub fn merge(&mut self, update: NodeConfigUpdate) {
        if let Some(volume) = update.audio.and_then(|a| a.volume) {
            self.audio.volume = clamp_f64(volume, 0.0, 1.0);
        }
        let Some(acc) = update.accessibility else {
            return;
        };
        let target = &mut self.accessibility;
        if let Some(v) = acc.captions {
            target.captions = v;
        }
        if let Some(v) = acc.visual_pulse {
            target.visual_pulse = v;
        }
        if let Some(v) = acc.proximity_glow {
            target.proximity_glow = v;
        }
        if let Some(v) = acc.mobility_buffer_ms {
            target.mobility_buffer_ms = v.min(MAX_MOBILITY_BUFFER_MS as u64);
        }
        if let Some(v) = acc.repeat {
            target.repeat = v.min(MAX_REPEAT as u32);
        }
        if let Some(v) = acc.pace {
            target.pace = clamp_f64(v, MIN_PACE, MAX_PACE);
        }
        if let Some(v) = acc.safety_limiter {
            target.safety_limiter = v;
        }
    }
}

/// Build the payload for one node from the global settings and its overrides.
pub fn build_node_payload(global: &SettingsMap, node_override: &SettingsMap, quiet: bool) -> NodePayload {
    let sensory_friendly = global.get("sensory_friendly").map(truthy).unwrap_or(false);

    let captions = node_override
        .get("captions")
        .or_else(|| global.get("captions"))
        .map(truthy)
        .unwrap_or(false);
    let mut visual_pulse = node_override.get("visual_pulse").map(truthy).unwrap_or(false);
    let mut proximity_glow = node_override.get("proximity_glow").map(truthy).unwrap_or(true);

    let default_buffer = clamp_int(
        global.get("mobility_buffer_ms"),
        DEFAULT_MOBILITY_BUFFER_MS,
        0,
        MAX_MOBILITY_BUFFER_MS,
    );
    let mobility_buffer_ms = clamp_int(
        node_override.get("mobility_buffer_ms"),
        default_buffer,
        0,
        MAX_MOBILITY_BUFFER_MS,
    );
    let repeat = clamp_int(node_override.get("repeat"), 0, 0, MAX_REPEAT);

    let base_pace = if sensory_friendly { SENSORY_FRIENDLY_PACE } else { 1.0 };
    let pace = clamp_float(node_override.get("pace"), base_pace, MIN_PACE, MAX_PACE);

    let safety_limiter = node_override
        .get("safety_limiter")
        .or_else(|| global.get("safety_limiter"))
        .map(truthy)
        .unwrap_or(true);

    let volume = match node_override.get("volume") {
        Some(v) if !v.is_null() => clamp_float(Some(v), 0.0, 0.0, 1.0),
        _ => {
            let mut volume = DEFAULT_VOLUME;
            if sensory_friendly {
                volume = volume.min(SENSORY_FRIENDLY_VOLUME_CAP);
            }
            if quiet {
                volume = volume.min(QUIET_HOURS_VOLUME_CAP);
            }
            volume
        }
    };

    if quiet {
        if !node_override.contains_key("visual_pulse") {
            visual_pulse = false;
        }
        if !node_override.contains_key("proximity_glow") {
            proximity_glow = false;
        }
    }

    NodePayload {
        audio: AudioSettings { volume },
        accessibility: AccessibilitySettings {
            captions,
            visual_pulse,
            proximity_glow,
            mobility_buffer_ms: mobility_buffer_ms as u64,
            repeat: repeat as u32,
            pace,
            safety_limiter,
        },
    }
}

pub fn quiet_hours_active(global: &SettingsMap, now: NaiveTime) -> bool {
    quiet_hours::is_active(global.get("quiet_hours"), now)
}

/// Loose truthiness for hand-written YAML/JSON values: empty and zero are false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|f: &f64| f.is_finite())
}

/// Absent values take `default`; present values that do not coerce clamp to `min`.
fn clamp_int(value: Option<&Value>, default: i64, min: i64, max: i64) -> i64 {
    let number = match value {
        None => default,
        Some(v) => coerce_int(v).unwrap_or(min),
    };
    number.clamp(min, max)
}

fn clamp_float(value: Option<&Value>, default: f64, min: f64, max: f64) -> f64 {
    let number = match value {
        None => default,
        Some(v) => coerce_float(v).unwrap_or(min),
    };
    clamp_f64(number, min, max)
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> SettingsMap {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_defaults_without_settings() {
        let payload = build_node_payload(&SettingsMap::new(), &SettingsMap::new(), false);
        assert_eq!(payload, NodePayload::default());
    }

    #[test]
    fn test_sensory_friendly_lowers_volume_and_pace() {
        let global = map(json!({"sensory_friendly": true}));
        let payload = build_node_payload(&global, &SettingsMap::new(), false);
        assert_eq!(payload.audio.volume, SENSORY_FRIENDLY_VOLUME_CAP);
        assert_eq!(payload.accessibility.pace, 0.9);
    }

    #[test]
    fn test_override_values_are_clamped() {
        let overrides = map(json!({
            "repeat": 7,
            "pace": 3.0,
            "volume": 1.8,
            "mobility_buffer_ms": -20,
        }));
        let payload = build_node_payload(&SettingsMap::new(), &overrides, true);
        assert_eq!(payload.accessibility.repeat, 2);
        assert_eq!(payload.accessibility.pace, MAX_PACE);
        assert_eq!(payload.audio.volume, 1.0);
        assert_eq!(payload.accessibility.mobility_buffer_ms, 0);
    }

    #[test]
    fn test_garbage_values_fall_to_minimum() {
        let global = map(json!({"mobility_buffer_ms": "lots"}));
        let overrides = map(json!({"repeat": "twice", "pace": [1], "volume": "loud"}));
        let payload = build_node_payload(&global, &overrides, false);
        assert_eq!(payload.accessibility.mobility_buffer_ms, 0);
        assert_eq!(payload.accessibility.repeat, 0);
        assert_eq!(payload.accessibility.pace, MIN_PACE);
        assert_eq!(payload.audio.volume, 0.0);
    }

    #[test]
    fn test_numeric_strings_and_floats_coerce() {
        let overrides = map(json!({"repeat": "1", "mobility_buffer_ms": 1500.9, "pace": "0.95"}));
        let payload = build_node_payload(&SettingsMap::new(), &overrides, false);
        assert_eq!(payload.accessibility.repeat, 1);
        assert_eq!(payload.accessibility.mobility_buffer_ms, 1500);
        assert_eq!(payload.accessibility.pace, 0.95);
    }

    #[test]
    fn test_node_override_beats_global_flags() {
        let global = map(json!({"captions": true, "safety_limiter": true}));
        let overrides = map(json!({"captions": false, "safety_limiter": false}));
        let payload = build_node_payload(&global, &overrides, false);
        assert!(!payload.accessibility.captions);
        assert!(!payload.accessibility.safety_limiter);
    }

    #[test]
    fn test_null_volume_override_uses_default_logic() {
        let overrides = map(json!({"volume": null}));
        let payload = build_node_payload(&SettingsMap::new(), &overrides, true);
        assert_eq!(payload.audio.volume, QUIET_HOURS_VOLUME_CAP);
    }

    #[test]
    fn test_merge_partial_update() {
        let mut payload = NodePayload::default();
        let update: NodeConfigUpdate = serde_json::from_value(json!({
            "audio": {"volume": 0.5},
            "accessibility": {"repeat": 5, "visual_pulse": true}
        }))
        .unwrap();
        payload.merge(update);
        assert_eq!(payload.audio.volume, 0.5);
        assert_eq!(payload.accessibility.repeat, 2);
        assert!(payload.accessibility.visual_pulse);
        assert!(payload.accessibility.proximity_glow);
    }
}
