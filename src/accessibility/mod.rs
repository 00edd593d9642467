//! Accessibility profiles: loading, persisting, and deriving node payloads.
//!
//! Profiles live in a YAML file with three sections:
//!
//! ```yaml
//! global:             # installation-wide settings
//!   quiet_hours: ["22:00-07:00"]
//!   sensory_friendly: false
//! presets:            # named bundles merged into `global` on demand
//!   hard_of_hearing: { captions: true }
//! per_node_overrides: # settings for a single node
//!   object1: { visual_pulse: true }
//! ```
//!
//! Values stay loosely typed (`serde_json::Value`) until derivation, matching
//! what staff can write by hand.

mod payload;
pub mod quiet_hours;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use payload::{
    build_node_payload, quiet_hours_active, AccessibilitySettings, AccessibilityUpdate,
    AudioSettings, AudioUpdate, NodeConfigUpdate, NodePayload,
};

/// Loosely typed settings mapping (sorted by key).
pub type SettingsMap = serde_json::Map<String, Value>;

#[derive(Debug, Error)]
pub enum ProfilesError {
    #[error("Failed to access profiles file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid profiles YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to encode profiles: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0} must be a mapping.")]
    NotAMapping(&'static str),

    #[error("Preset '{0}' not found.")]
    PresetNotFound(String),

    #[error("{0}")]
    QuietHoursShape(String),

    #[error("Invalid quiet_hours entries (expected HH:MM-HH:MM): {}", .0.join(", "))]
    InvalidQuietHours(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityProfiles {
    #[serde(default)]
    pub global: SettingsMap,
    #[serde(default)]
    pub presets: BTreeMap<String, Value>,
    #[serde(default)]
    pub per_node_overrides: BTreeMap<String, Value>,
    /// Unknown top-level keys, preserved on save.
    #[serde(flatten)]
    pub extra: SettingsMap,
}

impl AccessibilityProfiles {
    /// Load profiles from disk. A missing file yields empty defaults.
    pub fn load(path: &Path) -> Result<Self, ProfilesError> {
        if !path.exists() {
            tracing::debug!("No profiles at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ProfilesError> {
        let document: serde_yaml::Value = if contents.trim().is_empty() {
            serde_yaml::Value::Null
        } else {
            serde_yaml::from_str(contents)?
        };
        let profiles = match document {
            serde_yaml::Value::Null => Self::default(),
            serde_yaml::Value::Mapping(_) => serde_yaml::from_value(document)?,
            _ => return Err(ProfilesError::NotAMapping("Accessibility profiles file")),
        };
        quiet_hours::validate(profiles.global.get("quiet_hours"))?;
        Ok(profiles)
    }

    /// Persist profiles with sorted keys, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ProfilesError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = self.to_yaml()?;
        std::fs::write(path, contents)?;
        tracing::debug!("Saved accessibility profiles to {}", path.display());
        Ok(())
    }

    /// Render as YAML with every level, the top included, in key order.
    pub fn to_yaml(&self) -> Result<String, ProfilesError> {
        // Flattened extras would otherwise follow the named sections.
        let sorted = serde_json::to_value(self)?;
        Ok(serde_yaml::to_string(&sorted)?)
    }

    /// Merge a named preset into the global settings, rejecting presets whose
    /// quiet hours would leave the profiles unloadable.
    pub fn apply_preset(&mut self, preset_name: &str) -> Result<(), ProfilesError> {
        let preset = self
            .presets
            .get(preset_name)
            .ok_or_else(|| ProfilesError::PresetNotFound(preset_name.to_string()))?;
        let values = match preset {
            Value::Null => SettingsMap::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(ProfilesError::NotAMapping("Preset values")),
        };
        self.update_global(values)
    }

    /// Merge values into the global settings, rejecting invalid quiet hours.
    ///
    /// Validation runs before the merge so a rejected update leaves the
    /// profiles untouched.
    pub fn update_global(&mut self, values: SettingsMap) -> Result<(), ProfilesError> {
        let mut merged = self.global.clone();
        merged.extend(values);
        quiet_hours::validate(merged.get("quiet_hours"))?;
        self.global = merged;
        Ok(())
    }

    /// Store overrides for a node. Null and empty-string values are dropped;
    /// when nothing remains the node's entry is removed.
    pub fn set_node_override(&mut self, node_id: &str, overrides: SettingsMap) {
        let normalised: SettingsMap = overrides
            .into_iter()
            .filter(|(_, value)| !(value.is_null() || value.as_str() == Some("")))
            .collect();
        if normalised.is_empty() {
            self.per_node_overrides.remove(node_id);
        } else {
            self.per_node_overrides
                .insert(node_id.to_string(), Value::Object(normalised));
        }
    }

    pub fn node_override(&self, node_id: &str) -> SettingsMap {
        match self.per_node_overrides.get(node_id) {
            Some(Value::Object(map)) => map.clone(),
            _ => SettingsMap::new(),
        }
    }

    pub fn quiet_hours_active(&self, now: NaiveTime) -> bool {
        quiet_hours_active(&self.global, now)
    }

    /// Derive the configuration payload for every given node at time `now`.
    pub fn runtime_payloads<'a, I>(&self, node_ids: I, now: NaiveTime) -> BTreeMap<String, NodePayload>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let quiet = self.quiet_hours_active(now);
        node_ids
            .into_iter()
            .map(|id| {
                let payload = build_node_payload(&self.global, &self.node_override(id), quiet);
                (id.to_string(), payload)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn profiles_from(value: Value) -> AccessibilityProfiles {
        serde_json::from_value(value).unwrap()
    }

    fn map(value: Value) -> SettingsMap {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_quiet_hours_dim_output() {
        let profiles = profiles_from(json!({
            "global": {
                "quiet_hours": ["08:00-09:00"],
                "captions": false,
                "sensory_friendly": false,
                "safety_limiter": true
            },
            "per_node_overrides": {}
        }));

        let payloads = profiles.runtime_payloads(["object1"], at(8, 30));
        let node = &payloads["object1"];
        assert!(node.audio.volume <= 0.45);
        assert!(!node.accessibility.visual_pulse);
        assert!(!node.accessibility.proximity_glow);
    }

    #[test]
    fn test_quiet_hours_respect_explicit_overrides() {
        let profiles = profiles_from(json!({
            "global": {
                "quiet_hours": [{"bogus": "value"}],
                "sensory_friendly": false
            },
            "per_node_overrides": {
                "object1": {"visual_pulse": true, "proximity_glow": true}
            }
        }));

        let payloads = profiles.runtime_payloads(["object1"], at(1, 0));
        let node = &payloads["object1"];
        assert!(node.accessibility.visual_pulse);
        assert!(node.accessibility.proximity_glow);
    }

    #[test]
    fn test_explicit_led_overrides_survive_active_quiet_hours() {
        let profiles = profiles_from(json!({
            "global": {"quiet_hours": "00:00-23:59"},
            "per_node_overrides": {"object1": {"proximity_glow": true}}
        }));
        let payloads = profiles.runtime_payloads(["object1", "object2"], at(12, 0));
        assert!(payloads["object1"].accessibility.proximity_glow);
        assert!(!payloads["object2"].accessibility.proximity_glow);
    }

    #[test]
    fn test_load_profiles_validates_quiet_hours() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profiles.yaml");
        std::fs::write(&path, "global:\n  quiet_hours:\n    - invalid\n").unwrap();
        assert!(matches!(
            AccessibilityProfiles::load(&path),
            Err(ProfilesError::InvalidQuietHours(_))
        ));
    }

    #[test]
    fn test_load_missing_or_empty_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert_eq!(
            AccessibilityProfiles::load(&missing).unwrap(),
            AccessibilityProfiles::default()
        );

        let empty = dir.path().join("empty.yaml");
        std::fs::write(&empty, "").unwrap();
        assert_eq!(
            AccessibilityProfiles::load(&empty).unwrap(),
            AccessibilityProfiles::default()
        );

        let braces = dir.path().join("braces.yaml");
        std::fs::write(&braces, "{}").unwrap();
        assert_eq!(
            AccessibilityProfiles::load(&braces).unwrap(),
            AccessibilityProfiles::default()
        );
    }

    #[test]
    fn test_load_rejects_non_mapping_document() {
        assert!(matches!(
            AccessibilityProfiles::from_yaml("- a\n- b\n"),
            Err(ProfilesError::NotAMapping(_))
        ));
    }

    #[test]
    fn test_save_and_reload_preserves_unknown_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/profiles.yaml");
        let mut profiles = AccessibilityProfiles::from_yaml(
            "version: 2\nglobal:\n  captions: true\npresets:\n  calm:\n    sensory_friendly: true\n",
        )
        .unwrap();
        profiles.set_node_override("object2", map(json!({"repeat": 1})));
        profiles.save(&path).unwrap();

        let reloaded = AccessibilityProfiles::load(&path).unwrap();
        assert_eq!(reloaded, profiles);
        assert_eq!(reloaded.extra.get("version"), Some(&json!(2)));
    }

    #[test]
    fn test_apply_preset_merges_into_global() {
        let mut profiles = profiles_from(json!({
            "global": {"captions": false, "sensory_friendly": false},
            "presets": {
                "hard_of_hearing": {"captions": true},
                "empty": null,
                "broken": "nope"
            }
        }));

        profiles.apply_preset("hard_of_hearing").unwrap();
        assert_eq!(profiles.global.get("captions"), Some(&json!(true)));
        assert_eq!(profiles.global.get("sensory_friendly"), Some(&json!(false)));

        profiles.apply_preset("empty").unwrap();
        assert!(matches!(
            profiles.apply_preset("broken"),
            Err(ProfilesError::NotAMapping(_))
        ));
        assert!(matches!(
            profiles.apply_preset("missing"),
            Err(ProfilesError::PresetNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_apply_preset_rejects_invalid_quiet_hours_without_mutating() {
        let mut profiles = profiles_from(json!({
            "global": {"quiet_hours": ["22:00-07:00"], "captions": false},
            "presets": {"night": {"quiet_hours": ["late"], "captions": true}}
        }));
        let before = profiles.clone();

        assert!(matches!(
            profiles.apply_preset("night"),
            Err(ProfilesError::InvalidQuietHours(entries)) if entries == vec!["late".to_string()]
        ));
        assert_eq!(profiles, before);

        let yaml = profiles.to_yaml().unwrap();
        assert!(AccessibilityProfiles::from_yaml(&yaml).is_ok());
    }

    #[test]
    fn test_save_sorts_top_level_keys() {
        let mut profiles = AccessibilityProfiles::from_yaml(
            "version: 2\nglobal:\n  captions: true\nauthor: staff\n",
        )
        .unwrap();
        profiles.set_node_override("object1", map(json!({"repeat": 1})));

        let yaml = profiles.to_yaml().unwrap();
        let top_level: Vec<&str> = yaml
            .lines()
            .filter(|line| !line.starts_with(' ') && !line.starts_with('-'))
            .filter_map(|line| line.split(':').next())
            .collect();
        assert_eq!(
            top_level,
            vec!["author", "global", "per_node_overrides", "presets", "version"]
        );
    }

    #[test]
    fn test_update_global_rejects_invalid_quiet_hours_without_mutating() {
        let mut profiles = AccessibilityProfiles::default();
        let result = profiles.update_global(map(json!({"quiet_hours": ["invalid"], "captions": true})));
        assert!(result.is_err());
        assert!(profiles.global.is_empty());

        profiles
            .update_global(map(json!({"quiet_hours": ["21:00-06:00"]})))
            .unwrap();
        assert!(profiles.quiet_hours_active(at(23, 0)));
    }

    #[test]
    fn test_set_node_override_drops_empty_values() {
        let mut profiles = AccessibilityProfiles::default();
        profiles.set_node_override(
            "object1",
            map(json!({"visual_pulse": true, "pace": "", "repeat": null, "captions": false})),
        );
        assert_eq!(
            profiles.node_override("object1"),
            map(json!({"visual_pulse": true, "captions": false}))
        );

        profiles.set_node_override("object1", map(json!({"pace": "", "repeat": null})));
        assert!(!profiles.per_node_overrides.contains_key("object1"));
    }
}
