//! Sensor and actuator seams for node devices.
//!
//! The installation hardware differs per object, so the node service only
//! talks to these traits. The shipped implementations read distances from a
//! file (written by a sensor daemon) and log actuator activity.

use std::path::PathBuf;
use std::time::Duration;

/// Distance source, polled by the node's sensor loop.
pub trait ProximitySensor: Send {
    /// Latest distance in millimetres, or `None` when nothing is in range
    /// or the reading is unavailable.
    fn read_distance_mm(&mut self) -> Option<u16>;
}

pub trait Led: Send {
    /// Short flash that accompanies a playback.
    fn pulse(&mut self);

    /// Steady glow while a visitor is near.
    fn glow(&mut self, on: bool);

    fn off(&mut self);
}

pub trait Haptic: Send {
    fn buzz(&mut self, duration: Duration);
}

/// Reads a distance in millimetres from a text file.
///
/// Empty, missing, or unparsable files count as "nobody there".
pub struct FileSensor {
    path: PathBuf,
    warned: bool,
}

impl FileSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            warned: false,
        }
    }
}

impl ProximitySensor for FileSensor {
    fn read_distance_mm(&mut self) -> Option<u16> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                if !self.warned {
                    tracing::warn!("Proximity source {} unreadable: {}", self.path.display(), e);
                    self.warned = true;
                }
                return None;
            }
        };
        self.warned = false;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<u16>() {
            Ok(distance) => Some(distance),
            Err(_) => {
                tracing::debug!("Ignoring proximity reading '{}'", trimmed);
                None
            }
        }
    }
}

/// Sensor for nodes without proximity hardware.
#[derive(Debug, Default)]
pub struct NullSensor;

impl ProximitySensor for NullSensor {
    fn read_distance_mm(&mut self) -> Option<u16> {
        None
    }
}

/// LED stand-in that logs state changes.
#[derive(Debug)]
pub struct LoggingLed {
    node_id: String,
    glowing: bool,
}

impl LoggingLed {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            glowing: false,
        }
    }
}

impl Led for LoggingLed {
    fn pulse(&mut self) {
        tracing::info!(node_id = %self.node_id, "LED pulse");
    }

    fn glow(&mut self, on: bool) {
        if self.glowing != on {
            self.glowing = on;
            tracing::info!(node_id = %self.node_id, on, "LED glow");
        }
    }

    fn off(&mut self) {
        self.glowing = false;
        tracing::debug!(node_id = %self.node_id, "LED off");
    }
}

#[derive(Debug)]
pub struct LoggingHaptic {
    node_id: String,
}

impl LoggingHaptic {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

impl Haptic for LoggingHaptic {
    fn buzz(&mut self, duration: Duration) {
        tracing::info!(node_id = %self.node_id, duration_ms = duration.as_millis() as u64, "Haptic buzz");
    }
}
