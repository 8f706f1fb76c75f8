//! Bus publisher with failure escalation
//!
//! A single failed publish is `BusUnavailable` and stays with the caller.
//! Once `threshold` publishes in a row have failed, the failure is reported
//! as `BusConnectionLost` so the supervisor reconnects.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use s3x_core::{BusClient, BusError, GatewayError, GatewayResult};

pub struct BusPublisher {
    bus: Arc<dyn BusClient>,
    threshold: u32,
    consecutive_failures: AtomicU32,
}

impl BusPublisher {
    /// `threshold` of 0 never escalates
    pub fn new(bus: Arc<dyn BusClient>, threshold: u32) -> Self {
        Self {
            bus,
            threshold,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn bus(&self) -> &Arc<dyn BusClient> {
        &self.bus
    }

    /// Consecutive failed publishes so far
    pub fn failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub async fn publish(&self, topic: &str, payload: &Value) -> GatewayResult<()> {
        match self.bus.publish(topic, payload).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                trace!(%topic, "Published");
                Ok(())
            }
            Err(BusError::Unavailable(msg)) | Err(BusError::ConnectionFailed(msg)) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if self.threshold > 0 && failures >= self.threshold {
                    Err(GatewayError::BusConnectionLost(format!(
                        "{} consecutive publish failures: {}",
                        failures, msg
                    )))
                } else {
                    warn!(%topic, failures, error = %msg, "Publish failed");
                    Err(GatewayError::BusUnavailable(msg))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3x_bus::MemoryBroker;
    use serde_json::json;

    #[tokio::test]
    async fn test_escalates_after_threshold() {
        let broker = MemoryBroker::new();
        let client = Arc::new(broker.client());
        client.connect().await.unwrap();
        let publisher = BusPublisher::new(client, 3);

        broker.set_available(false);
        for _ in 0..2 {
            assert!(matches!(
                publisher.publish("t", &json!(1)).await,
                Err(GatewayError::BusUnavailable(_))
            ));
        }
        let err = publisher.publish("t", &json!(1)).await.unwrap_err();
        assert!(err.is_connection_fault());

        broker.set_available(true);
        publisher.publish("t", &json!(1)).await.unwrap();
        assert_eq!(publisher.failures(), 0);
    }

    #[tokio::test]
    async fn test_zero_threshold_never_escalates() {
        let broker = MemoryBroker::new();
        let client = Arc::new(broker.client());
        client.connect().await.unwrap();
        let publisher = BusPublisher::new(client, 0);

        broker.set_available(false);
        for _ in 0..10 {
            let err = publisher.publish("t", &json!(1)).await.unwrap_err();
            assert!(!err.is_connection_fault());
        }
    }
}
