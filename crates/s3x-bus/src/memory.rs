//! In-process message bus
//!
//! A [`MemoryBroker`] routes messages between any number of
//! [`MemoryBusClient`]s using the same wildcard rules as MQTT. It records
//! every publish and can be switched unavailable to exercise failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use s3x_core::topic;
use s3x_core::{BusClient, BusError, BusMessage};

struct Subscriber {
    patterns: HashSet<String>,
    tx: broadcast::Sender<BusMessage>,
}

struct BrokerInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    published: RwLock<Vec<BusMessage>>,
    available: AtomicBool,
    next_client: AtomicU64,
}

/// Shared in-process broker
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                subscribers: RwLock::new(HashMap::new()),
                published: RwLock::new(Vec::new()),
                available: AtomicBool::new(true),
                next_client: AtomicU64::new(1),
            }),
        }
    }

    /// Create a client attached to this broker
    pub fn client(&self) -> MemoryBusClient {
        MemoryBusClient::new(self)
    }

    /// Make the broker reachable or unreachable
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    /// Every message published so far, in order
    pub fn published(&self) -> Vec<BusMessage> {
        self.inner.published.read().clone()
    }

    /// Messages published on topics matching `pattern`
    pub fn published_matching(&self, pattern: &str) -> Vec<BusMessage> {
        self.inner
            .published
            .read()
            .iter()
            .filter(|m| topic::matches(pattern, &m.topic))
            .cloned()
            .collect()
    }

    pub fn clear_published(&self) {
        self.inner.published.write().clear();
    }

    /// Number of connected clients subscribed to exactly `pattern`
    pub fn subscriber_count(&self, pattern: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .values()
            .filter(|s| s.patterns.contains(pattern))
            .count()
    }

    fn route(&self, topic: &str, payload: &Value) -> Result<(), BusError> {
        if !self.is_available() {
            return Err(BusError::Unavailable("memory broker offline".to_string()));
        }
        topic::validate_topic(topic)?;

        let message = BusMessage::new(topic, payload.clone());
        self.inner.published.write().push(message.clone());

        let subscribers = self.inner.subscribers.read();
        for subscriber in subscribers.values() {
            if subscriber
                .patterns
                .iter()
                .any(|pattern| topic::matches(pattern, topic))
            {
                let _ = subscriber.tx.send(message.clone());
            }
        }
        trace!(%topic, "Routed message");
        Ok(())
    }
}

/// Client attached to a [`MemoryBroker`]
pub struct MemoryBusClient {
    id: u64,
    broker: MemoryBroker,
    connected: AtomicBool,
    messages_tx: broadcast::Sender<BusMessage>,
}

impl MemoryBusClient {
    pub fn new(broker: &MemoryBroker) -> Self {
        let (messages_tx, _) = broadcast::channel(1024);
        Self {
            id: broker.inner.next_client.fetch_add(1, Ordering::SeqCst),
            broker: broker.clone(),
            connected: AtomicBool::new(false),
            messages_tx,
        }
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    fn ensure_connected(&self) -> Result<(), BusError> {
        if self.connected.load(Ordering::SeqCst) && self.broker.is_available() {
            Ok(())
        } else {
            Err(BusError::Unavailable("memory bus not connected".to_string()))
        }
    }
}

#[async_trait]
impl BusClient for MemoryBusClient {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), BusError> {
        if !self.broker.is_available() {
            return Err(BusError::ConnectionFailed(
                "memory broker offline".to_string(),
            ));
        }
        self.broker
            .inner
            .subscribers
            .write()
            .entry(self.id)
            .or_insert_with(|| Subscriber {
                patterns: HashSet::new(),
                tx: self.messages_tx.clone(),
            });
        self.connected.store(true, Ordering::SeqCst);
        debug!(client = self.id, "Memory bus client connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.connected.store(false, Ordering::SeqCst);
        self.broker.inner.subscribers.write().remove(&self.id);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.broker.is_available()
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        topic::validate_pattern(pattern)?;
        self.ensure_connected()?;
        if let Some(subscriber) = self.broker.inner.subscribers.write().get_mut(&self.id) {
            subscriber.patterns.insert(pattern.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        if let Some(subscriber) = self.broker.inner.subscribers.write().get_mut(&self.id) {
            subscriber.patterns.remove(pattern);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BusError> {
        self.ensure_connected()?;
        self.broker.route(topic, payload)
    }

    fn messages(&self) -> broadcast::Receiver<BusMessage> {
        self.messages_tx.subscribe()
    }
}
