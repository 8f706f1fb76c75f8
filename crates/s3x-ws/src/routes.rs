//! Client routing table
//!
//! Maps connected clients to the bus patterns they listen on and counts
//! clients per pattern, so the bridge subscribes a pattern for the first
//! client that needs it and unsubscribes it after the last one leaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use s3x_core::{topic, BusMessage};

struct Route {
    pattern: String,
    tx: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<HashMap<u64, Route>>,
    next_id: AtomicU64,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client listening on `pattern`. Returns the client id and
    /// whether it is the first client for that pattern.
    pub fn register(
        &self,
        pattern: impl Into<String>,
        tx: mpsc::UnboundedSender<Value>,
    ) -> (u64, bool) {
        let pattern = pattern.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut routes = self.routes.write();
        let first = !routes.values().any(|r| r.pattern == pattern);
        routes.insert(id, Route { pattern, tx });
        (id, first)
    }

    /// Remove a client. Returns its pattern if no other client uses it.
    pub fn remove(&self, id: u64) -> Option<String> {
        let mut routes = self.routes.write();
        let route = routes.remove(&id)?;
        if routes.values().any(|r| r.pattern == route.pattern) {
            None
        } else {
            Some(route.pattern)
        }
    }

    /// Forward a bus message to every matching client; returns how many
    /// clients it reached
    pub fn dispatch(&self, message: &BusMessage) -> usize {
        let routes = self.routes.read();
        routes
            .values()
            .filter(|r| topic::matches(&r.pattern, &message.topic))
            .filter(|r| r.tx.send(message.payload.clone()).is_ok())
            .count()
    }

    /// Drop every client; their sessions end when the channel closes
    pub fn clear(&self) {
        self.routes.write().clear();
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_pattern_refcount() {
        let table = RouteTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let (a, first) = table.register("from_arduino_gateway/#", tx.clone());
        assert!(first);
        let (b, first) = table.register("from_arduino_gateway/#", tx);
        assert!(!first);

        assert_eq!(table.remove(a), None);
        assert_eq!(table.remove(b).as_deref(), Some("from_arduino_gateway/#"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_dispatch_matches_pattern() {
        let table = RouteTable::new();
        let (arduino_tx, mut arduino_rx) = mpsc::unbounded_channel();
        let (esp_tx, mut esp_rx) = mpsc::unbounded_channel();
        table.register("from_arduino_gateway/#", arduino_tx);
        table.register("from_esp32_gateway/#", esp_tx);

        let reached = table.dispatch(&BusMessage::new(
            "from_arduino_gateway/2",
            json!({"report": "digital_input", "value": 1.0}),
        ));
        assert_eq!(reached, 1);
        assert_eq!(arduino_rx.try_recv().unwrap()["value"], 1.0);
        assert!(esp_rx.try_recv().is_err());

        // the parent topic is covered too
        let panic = BusMessage::new("from_arduino_gateway", json!({"report": "panic"}));
        assert_eq!(table.dispatch(&panic), 1);
    }
}
