//! Registry of installed nodes.
//!
//! Read from `config/nodes.yaml`; the hub uses it to know which nodes receive
//! configuration pushes and which triggers count as narrative fragments.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read node registry: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid node registry YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// What a node contributes to the installation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Carries one narrative fragment.
    #[default]
    Whisper,
    /// Stays silent until the narrative unlocks.
    Finale,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whisper => "whisper",
            Self::Finale => "finale",
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" => Ok(Self::Whisper),
            "finale" => Ok(Self::Finale),
            other => Err(format!("unknown node role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct NarrativeSection {
    required_fragments: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    narrative: NarrativeSection,
    #[serde(default)]
    nodes: BTreeMap<String, NodeEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, NodeEntry>,
    required_fragments: Option<usize>,
}

impl NodeRegistry {
    pub fn new(nodes: BTreeMap<String, NodeEntry>, required_fragments: Option<usize>) -> Self {
        Self {
            nodes,
            required_fragments,
        }
    }

    /// Load the registry. A missing file gives an empty registry.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        if !path.exists() {
            tracing::warn!(
                "No node registry at {}, no nodes will receive configuration",
                path.display()
            );
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: RegistryFile = serde_yaml::from_str(&contents)?;
        tracing::info!(
            "Loaded {} nodes from {}",
            file.nodes.len(),
            path.display()
        );
        Ok(Self::new(file.nodes, file.narrative.required_fragments))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn entries(&self) -> &BTreeMap<String, NodeEntry> {
        &self.nodes
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn role(&self, node_id: &str) -> Option<NodeRole> {
        self.nodes.get(node_id).map(|entry| entry.role)
    }

    /// Fragments needed to unlock: configured, or one per whisper node (at least 1).
    pub fn required_fragments(&self) -> usize {
        self.required_fragments.unwrap_or_else(|| {
            self.nodes
                .values()
                .filter(|entry| entry.role == NodeRole::Whisper)
                .count()
                .max(1)
        })
    }
}
