//! MQTT bus client using rumqttc

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use s3x_core::topic;
use s3x_core::{BusClient, BusError, BusMessage};

use crate::config::MqttConfig;

/// Consecutive event loop errors before the client gives up
const MAX_EVENT_LOOP_ERRORS: u32 = 5;
const RECONNECT_DELAY_MS: u64 = 1000;

/// Bus client for an MQTT broker.
///
/// Publishes at QoS 0 with JSON payloads. Active subscriptions are replayed
/// after the event loop reconnects.
pub struct MqttBusClient {
    config: MqttConfig,
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    messages_tx: broadcast::Sender<BusMessage>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBusClient {
    pub fn new(config: MqttConfig) -> Self {
        let (messages_tx, _) = broadcast::channel(1024);
        Self {
            config,
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            messages_tx,
            event_loop_handle: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("s3x-{}", Uuid::new_v4()));

        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs.max(5)));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }
        options
    }

    fn active_client(&self) -> Result<AsyncClient, BusError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable(format!(
                "not connected to {}:{}",
                self.config.host, self.config.port
            )));
        }
        self.client
            .lock()
            .clone()
            .ok_or_else(|| BusError::Unavailable("client not started".to_string()))
    }

    /// Drive the event loop, forwarding publishes and tracking connection state
    fn spawn_event_loop(
        &self,
        client: AsyncClient,
        mut event_loop: EventLoop,
        ready_tx: oneshot::Sender<Result<(), String>>,
    ) -> JoinHandle<()> {
        let connected = self.connected.clone();
        let subscriptions = self.subscriptions.clone();
        let messages_tx = self.messages_tx.clone();

        tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);
            let mut error_count = 0;

            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        error_count = 0;
                        connected.store(true, Ordering::SeqCst);
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Ok(()));
                        } else {
                            info!("MQTT reconnected, restoring subscriptions");
                            for pattern in subscriptions.read().iter() {
                                if let Err(e) = client.try_subscribe(pattern, QoS::AtMostOnce) {
                                    warn!(%pattern, %e, "Failed to restore subscription");
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = serde_json::from_slice(&publish.payload).unwrap_or_else(
                            |_| Value::String(String::from_utf8_lossy(&publish.payload).into()),
                        );
                        let _ = messages_tx.send(BusMessage::new(publish.topic, payload));
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        connected.store(false, Ordering::SeqCst);
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        if let Some(tx) = ready_tx.take() {
                            let _ = tx.send(Err(e.to_string()));
                            break;
                        }

                        error_count += 1;
                        if error_count >= MAX_EVENT_LOOP_ERRORS {
                            error!(error_count, %e, "MQTT event loop stopping");
                            break;
                        }
                        warn!(error_count, %e, "MQTT connection error");
                        tokio::time::sleep(Duration::from_millis(RECONNECT_DELAY_MS)).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl BusClient for MqttBusClient {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn connect(&self) -> Result<(), BusError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (client, event_loop) = AsyncClient::new(self.options(), 64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = self.spawn_event_loop(client.clone(), event_loop, ready_tx);

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let result = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(BusError::ConnectionFailed(e)),
            Ok(Err(_)) => Err(BusError::ConnectionFailed(
                "event loop stopped".to_string(),
            )),
            Err(_) => Err(BusError::ConnectionFailed("CONNACK timeout".to_string())),
        };

        if let Err(e) = result {
            handle.abort();
            return Err(e);
        }

        *self.client.lock() = Some(client);
        if let Some(old) = self.event_loop_handle.lock().replace(handle) {
            old.abort();
        }
        info!(host = %self.config.host, port = self.config.port, "Connected to MQTT broker");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        let client = self.client.lock().take();
        let handle = self.event_loop_handle.lock().take();

        if let Some(client) = client {
            let _ = client.disconnect().await;
        }
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.subscriptions.write().clear();
        info!("Disconnected from MQTT broker");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), BusError> {
        topic::validate_pattern(pattern)?;
        let client = self.active_client()?;
        client
            .subscribe(pattern, QoS::AtMostOnce)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        self.subscriptions.write().insert(pattern.to_string());
        debug!(%pattern, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), BusError> {
        self.subscriptions.write().remove(pattern);
        let client = self.active_client()?;
        client
            .unsubscribe(pattern)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), BusError> {
        topic::validate_topic(topic)?;
        let bytes = serde_json::to_vec(payload)?;
        let client = self.active_client()?;
        client
            .publish(topic, QoS::AtMostOnce, false, bytes)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }

    fn messages(&self) -> broadcast::Receiver<BusMessage> {
        self.messages_tx.subscribe()
    }
}

impl Drop for MqttBusClient {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let client = MqttBusClient::new(MqttConfig::new("127.0.0.1", 1));
        assert!(matches!(
            client.publish("a/b", &Value::Null).await,
            Err(BusError::Unavailable(_))
        ));
        assert!(matches!(
            client.publish("a/+", &Value::Null).await,
            Err(BusError::InvalidTopic(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = MqttBusClient::new(MqttConfig::new("127.0.0.1", port));
        assert!(matches!(
            client.connect().await,
            Err(BusError::ConnectionFailed(_))
        ));
        assert!(!client.is_connected().await);
    }
}
