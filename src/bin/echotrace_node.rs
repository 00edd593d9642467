//! EchoTrace node service for one installation object.

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use echotrace::mqtt::{self, MessageHandler, MqttPublisher};
use echotrace::node::{
    AudioPlayer, FileSensor, LoggingHaptic, LoggingLed, Mixer, NodeDevices, NodeService, NullMixer,
    NullSensor, ProcessMixer, ProximitySensor, TriggerGate,
};
use echotrace::{logging, shutdown, NodeConfig};

#[derive(Parser)]
#[command(name = "echotrace-node", version)]
#[command(about = "EchoTrace node service")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Run without audio output
    #[arg(long)]
    silent: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = NodeConfig::from_env()?;
    tracing::info!(
        node_id = %config.node_id,
        role = config.role.as_str(),
        "Starting node service"
    );

    let mixer: Box<dyn Mixer> = if args.silent {
        Box::new(NullMixer)
    } else {
        Box::new(ProcessMixer::new(config.player.clone()))
    };
    let mut player = AudioPlayer::new(mixer);
    if config.audio_path.exists() {
        player.load(config.audio_path.clone());
    } else {
        tracing::warn!("Audio fragment {} not found; node will stay silent", config.audio_path.display());
    }

    let sensor: Box<dyn ProximitySensor> = match &config.proximity_path {
        Some(path) => Box::new(FileSensor::new(path)),
        None => {
            tracing::warn!("ECHOTRACE_PROXIMITY_PATH not set; no visitors will be detected");
            Box::new(NullSensor)
        }
    };

    let will = NodeService::<MqttPublisher>::offline_will(&config.node_id);
    let client_id = format!("echotrace-node-{}", config.node_id);
    let (client, eventloop) = mqtt::connect(&config.broker, &client_id, Some(will));

    let devices = NodeDevices {
        player,
        led: Box::new(LoggingLed::new(config.node_id.clone())),
        haptic: Box::new(LoggingHaptic::new(config.node_id.clone())),
    };
    let service = Arc::new(NodeService::new(
        config.node_id.clone(),
        config.role,
        MqttPublisher::new(client.clone()),
        devices,
    ));

    // The broker connection outlives the loops so their last messages get out.
    let (mqtt_shutdown_tx, mqtt_shutdown_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handler: Arc<dyn MessageHandler> = service.clone();
    let mqtt_task = tokio::spawn(mqtt::run_event_loop(
        client,
        eventloop,
        service.subscriptions(),
        handler,
        mqtt_shutdown_rx,
    ));
    let sensor_task = tokio::spawn(Arc::clone(&service).run_sensor_loop(
        sensor,
        TriggerGate::new(config.trigger_distance_mm, config.cooldown),
        config.poll_interval,
        shutdown_rx.clone(),
    ));
    let heartbeat_task = tokio::spawn(Arc::clone(&service).run_heartbeat(config.health_interval, shutdown_rx));

    shutdown::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    for (name, task) in [("heartbeat", heartbeat_task), ("sensor", sensor_task)] {
        if let Err(e) = task.await {
            tracing::warn!("{} task ended abnormally: {}", name, e);
        }
    }

    let _ = mqtt_shutdown_tx.send(true);
    if let Err(e) = mqtt_task.await {
        tracing::warn!("MQTT task ended abnormally: {}", e);
    }
    Ok(())
}
