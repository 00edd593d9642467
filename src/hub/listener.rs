//! Hub-side handling of node traffic.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, RwLock};

use super::{AnalyticsLog, ConfigPushError, HubController, TriggerRecord};
use crate::mqtt::{publish_json, MessageHandler, Publisher};
use crate::narrative::{NarrativeSnapshot, NarrativeState};
use crate::nodes::{NodeRegistry, NodeRole};
use crate::topics::{self, Topic};

/// Acknowledgement a node publishes after applying a configuration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HealthReport {
    #[serde(default)]
    status: Option<String>,
}

pub struct HubListener<P> {
    publisher: P,
    registry: NodeRegistry,
    narrative: RwLock<NarrativeState>,
    last_seen: RwLock<BTreeMap<String, DateTime<Utc>>>,
    /// Pushes awaiting an ack, keyed by node id.
    pending: Mutex<HashMap<String, oneshot::Sender<ConfigAck>>>,
    analytics: AnalyticsLog,
    ack_timeout: Duration,
}

impl<P: Publisher> HubListener<P> {
    pub fn new(publisher: P, registry: NodeRegistry, analytics: AnalyticsLog, ack_timeout: Duration) -> Self {
        let narrative = NarrativeState::new(registry.required_fragments());
        Self {
            publisher,
            registry,
            narrative: RwLock::new(narrative),
            last_seen: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(HashMap::new()),
            analytics,
            ack_timeout,
        }
    }

    /// Topics the hub must subscribe to.
    pub fn subscriptions() -> Vec<String> {
        vec![
            topics::health_wildcard().to_string(),
            topics::trigger_wildcard().to_string(),
            topics::ack_wildcard().to_string(),
        ]
    }

    /// Publish the current narrative state (retained) so late joiners see it.
    pub async fn publish_state(&self) {
        let snapshot = self.narrative.read().await.snapshot();
        if let Err(e) = publish_json(&self.publisher, topics::hub_state_topic(), &snapshot, true).await {
            tracing::warn!("Failed to publish hub state: {}", e);
        }
    }

    async fn on_trigger(&self, node_id: &str) {
        let record = TriggerRecord {
            node_id: node_id.to_string(),
            at: Utc::now(),
        };
        if let Err(e) = self.analytics.record(&record).await {
            tracing::warn!(
                "Failed to append analytics to {}: {}",
                self.analytics.path().display(),
                e
            );
        }

        match self.registry.role(node_id) {
            Some(NodeRole::Whisper) => {}
            Some(role) => {
                tracing::debug!(node_id, role = role.as_str(), "Trigger does not advance narrative");
                return;
            }
            None => {
                tracing::warn!(node_id, "Trigger from unregistered node ignored");
                return;
            }
        }

        let (newly_recorded, unlocked_now) = {
            let mut narrative = self.narrative.write().await;
            let was_unlocked = narrative.is_unlocked();
            let newly = narrative.register_trigger(node_id);
            (newly, !was_unlocked && narrative.is_unlocked())
        };

        if !newly_recorded {
            tracing::debug!(node_id, "Duplicate trigger");
            return;
        }
        tracing::info!(node_id, "Whisper fragment triggered");
        if unlocked_now {
            tracing::info!("Narrative unlocked");
        }
        self.publish_state().await;
    }

    async fn on_health(&self, node_id: &str, payload: &[u8]) {
        let report: HealthReport = if payload.is_empty() {
            HealthReport::default()
        } else {
            match serde_json::from_slice(payload) {
                Ok(report) => report,
                Err(e) => {
                    tracing::warn!(node_id, "Malformed health payload: {}", e);
                    HealthReport::default()
                }
            }
        };

        let mut last_seen = self.last_seen.write().await;
        if report.status.as_deref() == Some("offline") {
            if last_seen.remove(node_id).is_some() {
                tracing::warn!(node_id, "Node went offline");
            }
        } else if last_seen.insert(node_id.to_string(), Utc::now()).is_none() {
            tracing::info!(node_id, "Node online");
        }
    }

    async fn on_ack(&self, node_id: &str, payload: &[u8]) {
        let ack: ConfigAck = match serde_json::from_slice(payload) {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(node_id, "Malformed config ack: {}", e);
                return;
            }
        };
        match self.pending.lock().await.remove(node_id) {
            Some(waiter) => {
                // The pusher may have timed out in the meantime.
                let _ = waiter.send(ack);
            }
            None => tracing::debug!(node_id, "Ack with no pending push"),
        }
    }
}

#[async_trait]
impl<P: Publisher> MessageHandler for HubListener<P> {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        match topics::parse(topic) {
            Some(Topic::Trigger(node_id)) => self.on_trigger(&node_id).await,
            Some(Topic::Health(node_id)) => self.on_health(&node_id, payload).await,
            Some(Topic::Ack(node_id)) => self.on_ack(&node_id, payload).await,
            Some(other) => tracing::debug!(?other, "Ignoring hub-originated topic"),
            None => tracing::debug!(topic, "Ignoring unknown topic"),
        }
    }
}

#[async_trait]
impl<P: Publisher> HubController for HubListener<P> {
    async fn push_node_config(&self, node_id: &str, payload: Value) -> Result<(), ConfigPushError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.get(node_id).is_some_and(|waiter| !waiter.is_closed()) {
                return Err(ConfigPushError::Busy(node_id.to_string()));
            }
            pending.insert(node_id.to_string(), tx);
        }

        let topic = topics::node_config_topic(node_id);
        if let Err(e) = publish_json(&self.publisher, &topic, &payload, false).await {
            self.pending.lock().await.remove(node_id);
            return Err(ConfigPushError::Broker(e.to_string()));
        }
        tracing::debug!(node_id, "Configuration published, awaiting ack");

        let outcome = tokio::time::timeout(self.ack_timeout, rx).await;
        match outcome {
            Ok(Ok(ConfigAck { ok: true, .. })) => {
                tracing::info!(node_id, "Configuration acknowledged");
                Ok(())
            }
            Ok(Ok(ConfigAck { error, .. })) => Err(ConfigPushError::Rejected {
                node_id: node_id.to_string(),
                reason: error.unwrap_or_else(|| "unspecified".to_string()),
            }),
            Ok(Err(_)) => Err(ConfigPushError::Broker(
                "acknowledgement channel closed".to_string(),
            )),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                if pending.get(node_id).is_some_and(|waiter| waiter.is_closed()) {
                    pending.remove(node_id);
                }
                Err(ConfigPushError::Timeout {
                    node_id: node_id.to_string(),
                    timeout_ms: self.ack_timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn state_snapshot(&self) -> NarrativeSnapshot {
        self.narrative.read().await.snapshot()
    }

    async fn reset_state(&self) -> NarrativeSnapshot {
        let snapshot = {
            let mut narrative = self.narrative.write().await;
            narrative.reset();
            narrative.snapshot()
        };
        tracing::info!("Narrative state reset");
        self.publish_state().await;
        snapshot
    }

    async fn health_snapshot(&self) -> BTreeMap<String, f64> {
        self.last_seen
            .read()
            .await
            .iter()
            .map(|(id, at)| (id.clone(), at.timestamp_millis() as f64 / 1000.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::testing::RecordingPublisher;
    use crate::nodes::NodeEntry;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry() -> NodeRegistry {
        let mut nodes = BTreeMap::new();
        for id in ["object1", "object2"] {
            nodes.insert(id.to_string(), NodeEntry::default());
        }
        nodes.insert(
            "finale".to_string(),
            NodeEntry {
                role: NodeRole::Finale,
                label: None,
            },
        );
        NodeRegistry::new(nodes, None)
    }

    fn listener(timeout: Duration) -> (Arc<HubListener<RecordingPublisher>>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let analytics = AnalyticsLog::new(dir.path().join("analytics.jsonl"));
        let hub = HubListener::new(RecordingPublisher::default(), registry(), analytics, timeout);
        (Arc::new(hub), dir)
    }

    #[tokio::test]
    async fn test_triggers_unlock_and_publish_state() {
        let (hub, _dir) = listener(Duration::from_millis(50));

        hub.handle("ECHOTRACE/trigger/object1", b"{}").await;
        hub.handle("ECHOTRACE/trigger/object1", b"{}").await;
        assert!(!hub.state_snapshot().await.unlocked);

        hub.handle("ECHOTRACE/trigger/object2", b"{}").await;
        let state = hub.state_snapshot().await;
        assert!(state.unlocked);
        assert_eq!(state.triggered, vec!["object1", "object2"]);

        // One publish per newly recorded fragment, retained.
        let published = hub.publisher.messages_on(topics::hub_state_topic()).await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[1], json!({"unlocked": true, "triggered": ["object1", "object2"]}));
        assert!(hub.publisher.sent.lock().await.iter().all(|(_, _, retain)| *retain));

        let summary = hub.analytics.summary().await.unwrap().unwrap();
        assert_eq!(summary.total_triggers, 3);
    }

    #[tokio::test]
    async fn test_finale_and_unknown_triggers_do_not_count() {
        let (hub, _dir) = listener(Duration::from_millis(50));
        hub.handle("ECHOTRACE/trigger/finale", b"").await;
        hub.handle("ECHOTRACE/trigger/stranger", b"").await;
        assert!(hub.state_snapshot().await.triggered.is_empty());

        let summary = hub.analytics.summary().await.unwrap().unwrap();
        assert_eq!(summary.per_node["finale"], 1);
        assert_eq!(summary.per_node["stranger"], 1);
    }

    #[tokio::test]
    async fn test_reset_republishes_state() {
        let (hub, _dir) = listener(Duration::from_millis(50));
        hub.handle("ECHOTRACE/trigger/object1", b"{}").await;
        let snapshot = hub.reset_state().await;
        assert_eq!(snapshot, NarrativeSnapshot::default());

        let published = hub.publisher.messages_on(topics::hub_state_topic()).await;
        assert_eq!(published.last(), Some(&json!({"unlocked": false, "triggered": []})));
    }

    #[tokio::test]
    async fn test_health_tracks_last_seen_and_offline() {
        let (hub, _dir) = listener(Duration::from_millis(50));
        hub.handle("ECHOTRACE/health/object1", br#"{"status":"ok"}"#).await;
        hub.handle("ECHOTRACE/health/object2", b"not json").await;
        let health = hub.health_snapshot().await;
        assert_eq!(health.keys().collect::<Vec<_>>(), vec!["object1", "object2"]);
        assert!(health["object1"] > 1_600_000_000.0);

        hub.handle("ECHOTRACE/health/object1", br#"{"status":"offline"}"#).await;
        assert!(!hub.health_snapshot().await.contains_key("object1"));
    }

    #[tokio::test]
    async fn test_push_completes_on_ack() {
        let (hub, _dir) = listener(Duration::from_secs(5));
        let pusher = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                hub.push_node_config("object1", json!({"audio": {"volume": 0.5}}))
                    .await
            })
        };

        // Wait for the config publish before acking.
        let topic = topics::node_config_topic("object1");
        while hub.publisher.messages_on(&topic).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        hub.handle("ECHOTRACE/ack/object1", br#"{"ok":true}"#).await;

        assert_eq!(pusher.await.unwrap(), Ok(()));
        assert_eq!(
            hub.publisher.messages_on(&topic).await,
            vec![json!({"audio": {"volume": 0.5}})]
        );
    }

    #[tokio::test]
    async fn test_push_rejected_by_node() {
        let (hub, _dir) = listener(Duration::from_secs(5));
        let pusher = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.push_node_config("object2", json!({})).await })
        };
        let topic = topics::node_config_topic("object2");
        while hub.publisher.messages_on(&topic).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        hub.handle("ECHOTRACE/ack/object2", br#"{"ok":false,"error":"bad volume"}"#)
            .await;

        let err = pusher.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            ConfigPushError::Rejected {
                node_id: "object2".to_string(),
                reason: "bad volume".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_push_is_busy_then_times_out() {
        let (hub, _dir) = listener(Duration::from_millis(100));
        let first = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.push_node_config("object1", json!({})).await })
        };
        let topic = topics::node_config_topic("object1");
        while hub.publisher.messages_on(&topic).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = hub.push_node_config("object1", json!({})).await;
        assert_eq!(second, Err(ConfigPushError::Busy("object1".to_string())));

        let first = first.await.unwrap().unwrap_err();
        assert_eq!(first.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);

        // Once the first push gave up, the node is free again.
        assert!(hub.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_broker_error() {
        let (hub, _dir) = listener(Duration::from_millis(50));
        hub.publisher.fail.store(true, Ordering::SeqCst);
        let err = hub.push_node_config("object1", json!({})).await.unwrap_err();
        assert!(matches!(err, ConfigPushError::Broker(_)));
        assert!(hub.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsolicited_ack_is_ignored() {
        let (hub, _dir) = listener(Duration::from_millis(50));
        hub.handle("ECHOTRACE/ack/object1", br#"{"ok":true}"#).await;
        hub.handle("ECHOTRACE/ack/object1", b"garbage").await;
        assert!(hub.pending.lock().await.is_empty());
    }
}
