//! Central hub services.
//!
//! The [`HubListener`] consumes node traffic from the broker and implements
//! [`HubController`], the seam the dashboard talks to.

mod analytics;
mod listener;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::narrative::NarrativeSnapshot;

pub use analytics::{AnalyticsLog, AnalyticsSummary, TriggerRecord};
pub use listener::{ConfigAck, HubListener};

/// Why a configuration push did not complete.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigPushError {
    #[error("A configuration push to {0} is already awaiting acknowledgement")]
    Busy(String),

    #[error("Node {node_id} rejected configuration: {reason}")]
    Rejected { node_id: String, reason: String },

    #[error("No acknowledgement from {node_id} within {timeout_ms} ms")]
    Timeout { node_id: String, timeout_ms: u64 },

    #[error("Broker unavailable: {0}")]
    Broker(String),
}

impl ConfigPushError {
    /// HTTP status the dashboard reports for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Broker(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Operations the dashboard needs from the running hub.
#[async_trait]
pub trait HubController: Send + Sync {
    /// Publish `payload` on the node's config topic and wait for its ack.
    async fn push_node_config(&self, node_id: &str, payload: Value) -> Result<(), ConfigPushError>;

    async fn state_snapshot(&self) -> NarrativeSnapshot;

    async fn reset_state(&self) -> NarrativeSnapshot;

    /// Last heartbeat per node, as unix seconds.
    async fn health_snapshot(&self) -> BTreeMap<String, f64>;
}

pub type SharedHubController = Arc<dyn HubController>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_error_status_codes() {
        assert_eq!(
            ConfigPushError::Busy("object1".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ConfigPushError::Timeout {
                node_id: "object1".into(),
                timeout_ms: 10
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ConfigPushError::Broker("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
