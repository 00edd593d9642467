//! Per-object node service.
//!
//! A node watches its proximity sensor, publishes triggers to the hub, plays
//! its audio fragment, and applies accessibility settings pushed by the hub.

pub mod audio;
mod gate;
pub mod hardware;
mod service;

pub use audio::{AudioError, AudioPlayer, Mixer, NullMixer, ProcessMixer};
pub use gate::{GateEvent, TriggerGate};
pub use hardware::{FileSensor, Haptic, Led, LoggingHaptic, LoggingLed, NullSensor, ProximitySensor};
pub use service::{NodeDevices, NodeService, SAFETY_LIMIT};
