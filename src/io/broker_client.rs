//! Broker client seam used by the position stream publisher

use crate::domain::types::PositionEvent;
use async_trait::async_trait;
use thiserror::Error;

/// A single position event did not reach the broker
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize position event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Rejection reported by a non-MQTT client implementation
    #[error("broker rejected publish: {0}")]
    Broker(String),
}

/// Publishes position events to a topic
///
/// Implementations own their connection lifecycle and must be safe to share
/// across concurrently running route streams.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn publish(&self, event: &PositionEvent, topic: &str) -> Result<(), PublishError>;
}
