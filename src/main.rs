//! EchoTrace hub: MQTT coordinator plus the staff dashboard.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use echotrace::api::{self, AppState};
use echotrace::hub::{AnalyticsLog, HubListener, SharedHubController};
use echotrace::mqtt::{self, MessageHandler, MqttPublisher};
use echotrace::nodes::NodeRegistry;
use echotrace::{logging, shutdown, HubConfig};

const CLIENT_ID: &str = "echotrace-hub";

#[derive(Parser)]
#[command(name = "echotrace-hub", version)]
#[command(about = "EchoTrace hub and staff dashboard")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = HubConfig::from_env()?;
    let registry = NodeRegistry::load(&config.nodes_path)?;
    tracing::info!(
        nodes = registry.entries().len(),
        required_fragments = registry.required_fragments(),
        "Loaded node registry from {}",
        config.nodes_path.display()
    );

    let (client, eventloop) = mqtt::connect(&config.broker, CLIENT_ID, None);
    let listener = Arc::new(HubListener::new(
        MqttPublisher::new(client.clone()),
        registry.clone(),
        AnalyticsLog::new(config.analytics_path.clone()),
        config.ack_timeout,
    ));
    // Retained, so nodes that connect later still learn the current state.
    listener.publish_state().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler: Arc<dyn MessageHandler> = listener.clone();
    let mqtt_task = tokio::spawn(mqtt::run_event_loop(
        client,
        eventloop,
        HubListener::<MqttPublisher>::subscriptions(),
        handler,
        shutdown_rx,
    ));

    let hub: SharedHubController = listener;
    let state = Arc::new(AppState::new(config, hub, registry));
    let served = api::serve(state, shutdown::shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = mqtt_task.await {
        tracing::warn!("MQTT task ended abnormally: {}", e);
    }
    served
}
