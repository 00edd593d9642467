//! Environment-driven configuration for the hub and node binaries.
//!
//! Every setting has a default except the node id. Parsing goes through a
//! lookup function so tests can supply their own environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::nodes::NodeRole;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl BrokerConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            host: string_or(lookup, "ECHOTRACE_MQTT_HOST", "localhost"),
            port: parse_or(lookup, "ECHOTRACE_MQTT_PORT", 1883)?,
            username: non_empty(lookup, "ECHOTRACE_MQTT_USER"),
            password: non_empty(lookup, "ECHOTRACE_MQTT_PASS"),
            keep_alive: Duration::from_secs(parse_or(lookup, "ECHOTRACE_MQTT_KEEPALIVE_S", 30)?),
        })
    }
}

/// Dashboard login. Both halves must be set for the dashboard to accept requests.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub admin: Option<AdminCredentials>,
    pub broker: BrokerConfig,
    pub profiles_path: PathBuf,
    pub nodes_path: PathBuf,
    pub analytics_path: PathBuf,
    pub ack_timeout: Duration,
}

impl HubConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let admin = match (
            non_empty(&lookup, "ECHOTRACE_ADMIN_USER"),
            non_empty(&lookup, "ECHOTRACE_ADMIN_PASS"),
        ) {
            (Some(username), Some(password)) => Some(AdminCredentials { username, password }),
            _ => None,
        };

        Ok(Self {
            host: string_or(&lookup, "ECHOTRACE_DASHBOARD_HOST", "0.0.0.0"),
            port: parse_or(&lookup, "ECHOTRACE_DASHBOARD_PORT", 8080)?,
            admin,
            broker: BrokerConfig::from_lookup(&lookup)?,
            profiles_path: PathBuf::from(string_or(
                &lookup,
                "ECHOTRACE_PROFILES_PATH",
                "config/accessibility_profiles.yaml",
            )),
            nodes_path: PathBuf::from(string_or(&lookup, "ECHOTRACE_NODES_PATH", "config/nodes.yaml")),
            analytics_path: PathBuf::from(string_or(
                &lookup,
                "ECHOTRACE_ANALYTICS_PATH",
                "data/analytics.jsonl",
            )),
            ack_timeout: Duration::from_millis(parse_or(&lookup, "ECHOTRACE_ACK_TIMEOUT_MS", 3000)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub node_id: String,
    pub role: NodeRole,
    pub broker: BrokerConfig,
    pub audio_path: PathBuf,
    /// External player binary used for playback.
    pub player: String,
    pub proximity_path: Option<PathBuf>,
    pub trigger_distance_mm: u16,
    pub cooldown: Duration,
    pub poll_interval: Duration,
    pub health_interval: Duration,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let node_id =
            non_empty(&lookup, "ECHOTRACE_NODE_ID").ok_or(ConfigError::Missing("ECHOTRACE_NODE_ID"))?;
        if node_id.contains(['/', '+', '#']) {
            return Err(ConfigError::Invalid {
                var: "ECHOTRACE_NODE_ID",
                value: node_id,
                reason: "must not contain MQTT separators or wildcards".to_string(),
            });
        }
        let audio_path = non_empty(&lookup, "ECHOTRACE_AUDIO_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("audio/{}.wav", node_id)));

        Ok(Self {
            role: parse_or(&lookup, "ECHOTRACE_NODE_ROLE", NodeRole::Whisper)?,
            broker: BrokerConfig::from_lookup(&lookup)?,
            audio_path,
            player: string_or(&lookup, "ECHOTRACE_PLAYER", "ffplay"),
            proximity_path: non_empty(&lookup, "ECHOTRACE_PROXIMITY_PATH").map(PathBuf::from),
            trigger_distance_mm: parse_or(&lookup, "ECHOTRACE_TRIGGER_MM", 600)?,
            cooldown: Duration::from_millis(parse_or(&lookup, "ECHOTRACE_COOLDOWN_MS", 5000)?),
            poll_interval: Duration::from_millis(parse_or(&lookup, "ECHOTRACE_POLL_MS", 100)?.max(10)),
            health_interval: Duration::from_secs(parse_or(&lookup, "ECHOTRACE_HEALTH_INTERVAL_S", 10)?.max(1)),
            node_id,
        })
    }
}

fn non_empty<F>(lookup: &F, var: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn string_or<F>(lookup: &F, var: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, var).unwrap_or_else(|| default.to_string())
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty(lookup, var) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_hub_defaults() {
        let config = HubConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert!(config.admin.is_none());
        assert_eq!(config.ack_timeout, Duration::from_secs(3));
        assert_eq!(
            config.profiles_path,
            PathBuf::from("config/accessibility_profiles.yaml")
        );
    }

    #[test]
    fn test_hub_admin_requires_both_halves() {
        let config = HubConfig::from_lookup(env(&[("ECHOTRACE_ADMIN_USER", "admin")])).unwrap();
        assert!(config.admin.is_none());

        let config = HubConfig::from_lookup(env(&[
            ("ECHOTRACE_ADMIN_USER", "admin"),
            ("ECHOTRACE_ADMIN_PASS", "secret"),
        ]))
        .unwrap();
        assert_eq!(
            config.admin,
            Some(AdminCredentials {
                username: "admin".to_string(),
                password: "secret".to_string(),
            })
        );
    }

    #[test]
    fn test_invalid_port_is_reported() {
        let err = HubConfig::from_lookup(env(&[("ECHOTRACE_MQTT_PORT", "eighty")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { var: "ECHOTRACE_MQTT_PORT", ref value, .. } if value == "eighty"
        ));
    }

    #[test]
    fn test_node_requires_id() {
        assert_eq!(
            NodeConfig::from_lookup(env(&[])).unwrap_err(),
            ConfigError::Missing("ECHOTRACE_NODE_ID")
        );
        assert!(NodeConfig::from_lookup(env(&[("ECHOTRACE_NODE_ID", "a/b")])).is_err());
    }

    #[test]
    fn test_node_config_values() {
        let config = NodeConfig::from_lookup(env(&[
            ("ECHOTRACE_NODE_ID", "object3"),
            ("ECHOTRACE_NODE_ROLE", "finale"),
            ("ECHOTRACE_TRIGGER_MM", "450"),
            ("ECHOTRACE_PROXIMITY_PATH", "/run/echotrace/distance"),
        ]))
        .unwrap();
        assert_eq!(config.node_id, "object3");
        assert_eq!(config.role, NodeRole::Finale);
        assert_eq!(config.trigger_distance_mm, 450);
        assert_eq!(config.audio_path, PathBuf::from("audio/object3.wav"));
        assert_eq!(
            config.proximity_path,
            Some(PathBuf::from("/run/echotrace/distance"))
        );
        assert_eq!(config.cooldown, Duration::from_secs(5));
    }
}
