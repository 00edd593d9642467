//! Narrative state tracking for the hub.
//!
//! Each whisper node carries one fragment of the story. Once enough distinct
//! fragments have been heard the mystery unlocks, and it stays unlocked until
//! staff reset the installation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Serialisable view of the narrative, published on the hub state topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSnapshot {
    pub unlocked: bool,
    /// Triggered whisper ids, sorted.
    #[serde(default)]
    pub triggered: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NarrativeState {
    required_fragments: usize,
    triggered: BTreeSet<String>,
    unlocked: bool,
}

impl NarrativeState {
    pub fn new(required_fragments: usize) -> Self {
        Self {
            required_fragments,
            triggered: BTreeSet::new(),
            unlocked: false,
        }
    }

    /// Record that a whisper node has triggered.
    ///
    /// Returns `true` when the trigger is newly recorded, `false` for duplicates.
    pub fn register_trigger(&mut self, node_id: &str) -> bool {
        if !self.triggered.insert(node_id.to_string()) {
            return false;
        }
        if !self.unlocked && self.triggered.len() >= self.required_fragments {
            self.unlocked = true;
        }
        true
    }

    pub fn reset(&mut self) {
        self.triggered.clear();
        self.unlocked = false;
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn required_fragments(&self) -> usize {
        self.required_fragments
    }

    /// Triggered ids in sorted order.
    pub fn triggered_list(&self) -> Vec<String> {
        self.triggered.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> NarrativeSnapshot {
        NarrativeSnapshot {
            unlocked: self.unlocked,
            triggered: self.triggered_list(),
        }
    }
}
