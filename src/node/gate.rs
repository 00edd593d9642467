//! Presence edge detection with cooldown.

use std::time::{Duration, Instant};

/// What a single sensor reading meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// Someone arrived and the node is armed.
    Triggered(u16),
    /// Someone arrived during the cooldown.
    Suppressed,
    /// The visitor left.
    Left,
    /// No change.
    Idle,
}

/// Turns raw distance readings into trigger events.
///
/// A trigger fires on the absent→present edge only, so a visitor standing
/// still does not retrigger. After a trigger the gate stays disarmed for the
/// cooldown plus the current mobility buffer.
#[derive(Debug)]
pub struct TriggerGate {
    trigger_mm: u16,
    cooldown: Duration,
    present: bool,
    rearm_at: Option<Instant>,
}

impl TriggerGate {
    pub fn new(trigger_mm: u16, cooldown: Duration) -> Self {
        Self {
            trigger_mm,
            cooldown,
            present: false,
            rearm_at: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn observe(&mut self, reading: Option<u16>, now: Instant, mobility_buffer: Duration) -> GateEvent {
        let in_range = reading.filter(|distance| *distance <= self.trigger_mm);
        let was_present = std::mem::replace(&mut self.present, in_range.is_some());

        match (was_present, in_range) {
            (false, Some(distance)) => {
                let armed = self.rearm_at.map_or(true, |at| now >= at);
                if !armed {
                    return GateEvent::Suppressed;
                }
                self.rearm_at = Some(now + self.cooldown + mobility_buffer);
                GateEvent::Triggered(distance)
            }
            (true, None) => GateEvent::Left,
            _ => GateEvent::Idle,
        }
    }
}
