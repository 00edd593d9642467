//! Node-side behaviour: config updates, presence handling, and heartbeats.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;

use super::audio::AudioPlayer;
use super::gate::{GateEvent, TriggerGate};
use super::hardware::{Haptic, Led, ProximitySensor};
use crate::accessibility::{NodeConfigUpdate, NodePayload};
use crate::hub::ConfigAck;
use crate::mqtt::{publish_json, MessageHandler, Publisher, Will};
use crate::narrative::NarrativeSnapshot;
use crate::nodes::NodeRole;
use crate::topics::{self, Topic};

/// Volume ceiling while the safety limiter is on.
pub const SAFETY_LIMIT: f64 = 0.8;
const HAPTIC_BUZZ: Duration = Duration::from_millis(200);

/// Physical outputs a node drives.
pub struct NodeDevices {
    pub player: AudioPlayer,
    pub led: Box<dyn Led>,
    pub haptic: Box<dyn Haptic>,
}

#[derive(Debug, Serialize)]
struct TriggerEvent<'a> {
    node_id: &'a str,
    distance_mm: u16,
    at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthReport<'a> {
    node_id: &'a str,
    role: NodeRole,
    status: &'static str,
    uptime_s: u64,
    hub_unlocked: bool,
}

pub struct NodeService<P> {
    node_id: String,
    role: NodeRole,
    publisher: P,
    settings: RwLock<NodePayload>,
    hub_unlocked: AtomicBool,
    player: Mutex<AudioPlayer>,
    led: Mutex<Box<dyn Led>>,
    haptic: Mutex<Box<dyn Haptic>>,
    started: Instant,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<P: Publisher> NodeService<P> {
    pub fn new(node_id: impl Into<String>, role: NodeRole, publisher: P, devices: NodeDevices) -> Self {
        let service = Self {
            node_id: node_id.into(),
            role,
            publisher,
            settings: RwLock::new(NodePayload::default()),
            hub_unlocked: AtomicBool::new(false),
            player: Mutex::new(devices.player),
            led: Mutex::new(devices.led),
            haptic: Mutex::new(devices.haptic),
            started: Instant::now(),
        };
        service.apply_to_devices(&NodePayload::default());
        service
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Topics this node must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            topics::node_config_topic(&self.node_id),
            topics::hub_state_topic().to_string(),
        ]
    }

    /// Last will registered with the broker, so the hub notices a lost node.
    pub fn offline_will(node_id: &str) -> Will {
        Will {
            topic: topics::health_topic(node_id),
            payload: offline_payload(node_id),
            retain: false,
        }
    }

    pub async fn settings(&self) -> NodePayload {
        self.settings.read().await.clone()
    }

    pub fn hub_unlocked(&self) -> bool {
        self.hub_unlocked.load(Ordering::SeqCst)
    }

    fn apply_to_devices(&self, payload: &NodePayload) {
        let mut player = lock(&self.player);
        player.set_safety_limit(if payload.accessibility.safety_limiter {
            SAFETY_LIMIT
        } else {
            1.0
        });
        player.set_volume(payload.audio.volume);
        if !payload.accessibility.proximity_glow {
            lock(&self.led).glow(false);
        }
    }

    /// Merge a config message into the runtime settings and acknowledge it.
    pub async fn apply_config(&self, payload: &[u8]) -> ConfigAck {
        let ack = match serde_json::from_slice::<NodeConfigUpdate>(payload) {
            Ok(update) => {
                let applied = {
                    let mut settings = self.settings.write().await;
                    settings.merge(update);
                    settings.clone()
                };
                self.apply_to_devices(&applied);
                tracing::info!(
                    node_id = %self.node_id,
                    volume = applied.audio.volume,
                    pace = applied.accessibility.pace,
                    "Configuration applied"
                );
                ConfigAck { ok: true, error: None }
            }
            Err(e) => {
                tracing::warn!(node_id = %self.node_id, "Rejected configuration: {}", e);
                ConfigAck {
                    ok: false,
                    error: Some(format!("invalid configuration: {}", e)),
                }
            }
        };

        let topic = topics::node_ack_topic(&self.node_id);
        if let Err(e) = publish_json(&self.publisher, &topic, &ack, false).await {
            tracing::warn!("Failed to publish config ack: {}", e);
        }
        ack
    }

    fn on_hub_state(&self, payload: &[u8]) {
        let snapshot: NarrativeSnapshot = match serde_json::from_slice(payload) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Malformed hub state: {}", e);
                return;
            }
        };
        let previous = self.hub_unlocked.swap(snapshot.unlocked, Ordering::SeqCst);
        if previous != snapshot.unlocked {
            tracing::info!(unlocked = snapshot.unlocked, "Hub narrative state changed");
        }
    }

    /// Handle a visitor arriving within trigger distance.
    pub async fn on_presence(&self, distance_mm: u16) {
        let event = TriggerEvent {
            node_id: &self.node_id,
            distance_mm,
            at: Utc::now(),
        };
        if let Err(e) = publish_json(&self.publisher, &topics::trigger_topic(&self.node_id), &event, false).await {
            tracing::warn!("Failed to publish trigger: {}", e);
        }

        if self.role == NodeRole::Finale && !self.hub_unlocked() {
            tracing::info!(node_id = %self.node_id, "Finale locked; staying silent");
            return;
        }

        let settings = self.settings().await;
        {
            let mut player = lock(&self.player);
            player.set_volume(settings.audio.volume);
            player.play(false, settings.accessibility.pace, settings.accessibility.repeat);
        }
        if settings.accessibility.visual_pulse {
            lock(&self.led).pulse();
        }
        lock(&self.haptic).buzz(HAPTIC_BUZZ);
        tracing::info!(node_id = %self.node_id, distance_mm, "Fragment played");
    }

    async fn set_presence_glow(&self, present: bool) {
        let enabled = self.settings.read().await.accessibility.proximity_glow;
        lock(&self.led).glow(present && enabled);
    }

    fn health_report(&self) -> HealthReport<'_> {
        HealthReport {
            node_id: &self.node_id,
            role: self.role,
            status: "ok",
            uptime_s: self.started.elapsed().as_secs(),
            hub_unlocked: self.hub_unlocked(),
        }
    }

    pub async fn publish_health(&self) {
        let topic = topics::health_topic(&self.node_id);
        if let Err(e) = publish_json(&self.publisher, &topic, &self.health_report(), false).await {
            tracing::warn!("Failed to publish health: {}", e);
        }
    }

    /// Poll `sensor` and react to presence edges until shutdown.
    pub async fn run_sensor_loop(
        self: Arc<Self>,
        mut sensor: Box<dyn ProximitySensor>,
        mut gate: TriggerGate,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let reading = sensor.read_distance_mm();
                    let buffer = Duration::from_millis(
                        self.settings.read().await.accessibility.mobility_buffer_ms,
                    );
                    match gate.observe(reading, Instant::now(), buffer) {
                        GateEvent::Triggered(distance) => {
                            self.set_presence_glow(true).await;
                            self.on_presence(distance).await;
                        }
                        GateEvent::Suppressed => {
                            tracing::debug!(node_id = %self.node_id, "Presence during cooldown");
                            self.set_presence_glow(true).await;
                        }
                        GateEvent::Left => self.set_presence_glow(false).await,
                        GateEvent::Idle => {}
                    }
                }
            }
        }
        lock(&self.led).off();
        tracing::info!("Sensor loop stopped");
    }

    /// Publish health every `interval` until shutdown, then report offline.
    pub async fn run_heartbeat(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.publish_health().await,
            }
        }

        let topic = topics::health_topic(&self.node_id);
        if let Err(e) = self.publisher.publish(&topic, offline_payload(&self.node_id), false).await {
            tracing::debug!("Failed to publish offline status: {}", e);
        }
    }
}

fn offline_payload(node_id: &str) -> Vec<u8> {
    serde_json::json!({ "node_id": node_id, "status": "offline" })
        .to_string()
        .into_bytes()
}

#[async_trait]
impl<P: Publisher> MessageHandler for NodeService<P> {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        match topics::parse(topic) {
            Some(Topic::Config(node_id)) if node_id == self.node_id => {
                self.apply_config(payload).await;
            }
            Some(Topic::HubState) => self.on_hub_state(payload),
            _ => tracing::debug!(topic, "Ignoring message"),
        }
    }
}
