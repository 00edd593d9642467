//! MQTT topic layout shared by the hub and the nodes.
//!
//! Every topic lives under [`PREFIX`]. Per-node topics end with the node id:
//!
//! ```text
//! ECHOTRACE/health/<node_id>   node -> hub heartbeat (and last will)
//! ECHOTRACE/trigger/<node_id>  node -> hub proximity trigger
//! ECHOTRACE/config/<node_id>   hub  -> node runtime configuration
//! ECHOTRACE/ack/<node_id>      node -> hub configuration acknowledgement
//! ECHOTRACE/state/hub          hub  -> nodes narrative state (retained)
//! ```

pub const PREFIX: &str = "ECHOTRACE";

const HUB_STATE: &str = "ECHOTRACE/state/hub";
const HEALTH_WILDCARD: &str = "ECHOTRACE/health/+";
const TRIGGER_WILDCARD: &str = "ECHOTRACE/trigger/+";
const ACK_WILDCARD: &str = "ECHOTRACE/ack/+";

pub fn health_topic(node_id: &str) -> String {
    format!("{PREFIX}/health/{node_id}")
}

pub fn trigger_topic(node_id: &str) -> String {
    format!("{PREFIX}/trigger/{node_id}")
}

pub fn hub_state_topic() -> &'static str {
    HUB_STATE
}

pub fn node_config_topic(node_id: &str) -> String {
    format!("{PREFIX}/config/{node_id}")
}

pub fn node_ack_topic(node_id: &str) -> String {
    format!("{PREFIX}/ack/{node_id}")
}

pub fn health_wildcard() -> &'static str {
    HEALTH_WILDCARD
}

pub fn trigger_wildcard() -> &'static str {
    TRIGGER_WILDCARD
}

pub fn ack_wildcard() -> &'static str {
    ACK_WILDCARD
}

/// A classified incoming topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Health(String),
    Trigger(String),
    Config(String),
    Ack(String),
    HubState,
}

/// Classify a concrete topic name.
///
/// Returns `None` for foreign prefixes, unknown kinds, and node ids that are
/// empty or span more than one level.
pub fn parse(topic: &str) -> Option<Topic> {
    let rest = topic.strip_prefix(PREFIX)?.strip_prefix('/')?;
    let (kind, id) = rest.split_once('/')?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    match kind {
        "health" => Some(Topic::Health(id.to_string())),
        "trigger" => Some(Topic::Trigger(id.to_string())),
        "config" => Some(Topic::Config(id.to_string())),
        "ack" => Some(Topic::Ack(id.to_string())),
        "state" if id == "hub" => Some(Topic::HubState),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_topics() {
        assert_eq!(health_topic("object1"), "ECHOTRACE/health/object1");
        assert_eq!(trigger_topic("object1"), "ECHOTRACE/trigger/object1");
        assert_eq!(node_config_topic("object2"), "ECHOTRACE/config/object2");
        assert_eq!(node_ack_topic("object3"), "ECHOTRACE/ack/object3");
        assert_eq!(hub_state_topic(), "ECHOTRACE/state/hub");
    }

    #[test]
    fn test_wildcards_match_topic_builders() {
        assert_eq!(health_wildcard(), health_topic("+"));
        assert_eq!(trigger_wildcard(), trigger_topic("+"));
        assert_eq!(ack_wildcard(), node_ack_topic("+"));
    }

    #[test]
    fn test_parse_round_trips_builders() {
        assert_eq!(
            parse(&trigger_topic("object1")),
            Some(Topic::Trigger("object1".to_string()))
        );
        assert_eq!(
            parse(&node_ack_topic("object4")),
            Some(Topic::Ack("object4".to_string()))
        );
        assert_eq!(parse(hub_state_topic()), Some(Topic::HubState));
    }

    #[test]
    fn test_parse_rejects_malformed_topics() {
        assert_eq!(parse("OTHER/trigger/object1"), None);
        assert_eq!(parse("ECHOTRACE/trigger/"), None);
        assert_eq!(parse("ECHOTRACE/trigger/a/b"), None);
        assert_eq!(parse("ECHOTRACE/unknown/object1"), None);
        assert_eq!(parse("ECHOTRACE/state/object1"), None);
        assert_eq!(parse("ECHOTRACEX/health/object1"), None);
    }
}
