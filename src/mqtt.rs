//! MQTT plumbing shared by the hub and node binaries.
//!
//! Components publish through the [`Publisher`] trait and receive through
//! [`MessageHandler`], so their logic can be tested without a broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound side of the broker connection.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError>;
}

/// Serialize `value` as JSON and publish it.
pub async fn publish_json<P, T>(publisher: &P, topic: &str, value: &T, retain: bool) -> Result<(), MqttError>
where
    P: Publisher + ?Sized,
    T: serde::Serialize + ?Sized,
{
    let payload = serde_json::to_vec(value)?;
    publisher.publish(topic, payload, retain).await
}

/// Inbound side: called for every publish received from the broker.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// [`Publisher`] backed by a rumqttc client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await?;
        Ok(())
    }
}

/// A message the broker publishes on our behalf if the connection drops.
#[derive(Debug, Clone)]
pub struct Will {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Build a client and its event loop. Nothing connects until the loop is polled.
pub fn connect(broker: &BrokerConfig, client_id: &str, will: Option<Will>) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(broker.keep_alive);
    options.set_clean_session(true);
    if let (Some(user), Some(pass)) = (&broker.username, &broker.password) {
        options.set_credentials(user.clone(), pass.clone());
    }
    if let Some(will) = will {
        options.set_last_will(LastWill::new(
            will.topic,
            will.payload,
            QoS::AtLeastOnce,
            will.retain,
        ));
    }
    tracing::info!(
        client_id,
        "Connecting to MQTT broker at {}:{}",
        broker.host,
        broker.port
    );
    AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY)
}

/// Deliver received messages to `handler` in arrival order on its own task.
///
/// Handlers publish through the same client, and those publishes only
/// complete while the event loop keeps polling, so the loop never awaits a
/// handler directly.
fn spawn_dispatcher(handler: Arc<dyn MessageHandler>) -> (mpsc::UnboundedSender<(String, Vec<u8>)>, JoinHandle<()>) {
    let (inbox, mut incoming) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
    let task = tokio::spawn(async move {
        while let Some((topic, payload)) = incoming.recv().await {
            handler.handle(&topic, &payload).await;
        }
    });
    (inbox, task)
}

/// Drive the connection until `shutdown` flips to `true`.
///
/// Subscriptions are reissued on every ConnAck since the session is clean.
/// On shutdown, messages already received are handled and requests queued
/// before the disconnect are still flushed.
pub async fn run_event_loop(
    client: AsyncClient,
    mut eventloop: EventLoop,
    subscriptions: Vec<String>,
    handler: Arc<dyn MessageHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (inbox, mut dispatcher) = spawn_dispatcher(handler);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Connected to MQTT broker");
                    for topic in &subscriptions {
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            tracing::warn!(topic = %topic, "Failed to subscribe: {}", e);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if inbox.send((publish.topic, publish.payload.to_vec())).is_err() {
                        tracing::warn!("Message dispatcher stopped; dropping message");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("MQTT connection error: {}; retrying in {:?}", e, RECONNECT_BACKOFF);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    drop(inbox);
    let settle = async {
        loop {
            tokio::select! {
                _ = &mut dispatcher => break,
                event = eventloop.poll() => if event.is_err() { break; }
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_GRACE, settle).await.is_err() {
        tracing::debug!("Timed out handling pending MQTT messages");
    }
    dispatcher.abort();

    match client.disconnect().await {
        Ok(()) => {
            let drain = async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
            };
            if tokio::time::timeout(DISCONNECT_GRACE, drain).await.is_err() {
                tracing::debug!("Timed out flushing MQTT requests");
            }
        }
        Err(e) => tracing::debug!("MQTT disconnect failed: {}", e),
    }
    tracing::info!("MQTT event loop stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Publisher that records every message, optionally failing each publish.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub sent: Mutex<Vec<(String, Vec<u8>, bool)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingPublisher {
        pub async fn messages_on(&self, topic: &str) -> Vec<serde_json::Value> {
            self.sent
                .lock()
                .await
                .iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, payload, _)| serde_json::from_slice(payload).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(MqttError::Client(rumqttc::ClientError::TryRequest(
                    rumqttc::Request::Disconnect(rumqttc::Disconnect),
                )));
            }
            self.sent
                .lock()
                .await
                .push((topic.to_string(), payload, retain));
            Ok(())
        }
    }
}
