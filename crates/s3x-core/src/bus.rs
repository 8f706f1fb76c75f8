//! BusClient trait - topic-based publish/subscribe over the message bus

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::BusError;

/// Inbound message delivered by the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Uniform interface over the bus transport.
///
/// Messages for subscribed patterns are delivered on [`BusClient::messages`]
/// in arrival order. `publish` is fire-and-forget: delivery, retry and
/// persistence belong to the bus. An unreachable transport fails `publish`
/// with [`BusError::Unavailable`].
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Transport name for logging
    fn name(&self) -> &'static str;

    /// Establish the session with the bus
    async fn connect(&self) -> Result<(), BusError>;

    /// Tear down the session and drop all subscriptions
    async fn disconnect(&self) -> Result<(), BusError>;

    async fn is_connected(&self) -> bool;

    /// Subscribe to a topic pattern (`+` and `#` wildcards)
    async fn subscribe(&self, pattern: &str) -> Result<(), BusError>;

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BusError>;

    /// Publish a JSON payload
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), BusError>;

    /// Receiver for messages matching the active subscriptions
    fn messages(&self) -> broadcast::Receiver<BusMessage>;
}
