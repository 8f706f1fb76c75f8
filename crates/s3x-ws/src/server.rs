//! WebSocket server and bus dispatcher

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use s3x_core::BusClient;

use crate::payload::{is_panic, localize_timestamp, reply_topic};
use crate::routes::RouteTable;

struct BridgeState {
    bus: Arc<dyn BusClient>,
    routes: RouteTable,
}

/// First message every client has to send
#[derive(Debug, Deserialize)]
struct ClientHello {
    id: String,
}

/// Builder for the bridge server
pub struct WsGateway {
    listen: SocketAddr,
    bus: Arc<dyn BusClient>,
}

impl WsGateway {
    pub fn new(listen: SocketAddr, bus: Arc<dyn BusClient>) -> Self {
        Self { listen, bus }
    }

    /// Connect the bus if needed, bind the listener and start serving
    pub async fn spawn(self) -> anyhow::Result<WsGatewayHandle> {
        if !self.bus.is_connected().await {
            self.bus.connect().await?;
        }

        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, bus = self.bus.name(), "WebSocket gateway listening");

        let state = Arc::new(BridgeState {
            bus: self.bus,
            routes: RouteTable::new(),
        });

        let app = Router::new()
            .route("/", get(upgrade_handler))
            .route("/ws", get(upgrade_handler))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch_loop(state.clone(), shutdown_rx.clone()));

        let mut server_shutdown = shutdown_rx;
        let server = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            });
            if let Err(e) = server.await {
                warn!(%e, "WebSocket server exited with error");
            }
        });

        Ok(WsGatewayHandle {
            address: local_addr,
            state,
            shutdown: shutdown_tx,
            server,
            dispatcher,
        })
    }
}

/// Handle for a running bridge
pub struct WsGatewayHandle {
    address: SocketAddr,
    state: Arc<BridgeState>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl WsGatewayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Number of identified clients
    pub fn client_count(&self) -> usize {
        self.state.routes.len()
    }

    /// Stop accepting clients, close the open ones and disconnect the bus
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        self.server.await?;
        self.dispatcher.await?;
        if let Err(e) = self.state.bus.disconnect().await {
            debug!(%e, "Bus disconnect failed");
        }
        info!("WebSocket gateway stopped");
        Ok(())
    }
}

async fn dispatch_loop(state: Arc<BridgeState>, mut shutdown: watch::Receiver<bool>) {
    let mut messages = state.bus.messages();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = messages.recv() => match message {
                Ok(message) => {
                    let reached = state.routes.dispatch(&message);
                    debug!(topic = %message.topic, reached, "Bus message dispatched");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dispatcher lagged behind the bus, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    // Dropping the senders closes every client socket
    state.routes.clear();
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

/// Wait for the `{"id": ...}` message. Anything else ends the session.
async fn read_hello(socket: &mut WebSocket) -> Option<String> {
    loop {
        let message = match socket.recv().await {
            Some(Ok(message)) => message,
            _ => return None,
        };
        match message {
            Message::Text(text) => {
                return match serde_json::from_str::<ClientHello>(text.as_str()) {
                    Ok(hello) => Some(hello.id),
                    Err(e) => {
                        error!(%e, "Client did not provide an id");
                        None
                    }
                };
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => {
                error!("Client did not provide an id");
                return None;
            }
        }
    }
}

async fn client_loop(mut socket: WebSocket, state: Arc<BridgeState>) {
    let Some(id) = read_hello(&mut socket).await else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let Some(reply) = reply_topic(&id) else {
        error!(%id, "Client id must start with 'to'");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let pattern = format!("{}/#", reply);
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let (client, first) = state.routes.register(pattern.clone(), tx);
    if first {
        if let Err(e) = state.bus.subscribe(&pattern).await {
            // a routed pattern always has a live subscription
            error!(%pattern, %e, "Subscribe failed, closing client");
            state.routes.remove(client);
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    }
    info!(client, publish = %id, receive = %reply, "WebSocket client identified");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(payload) = outbound else { break };
                let panic = is_panic(&payload);
                let text = localize_timestamp(payload).to_string();
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                if panic {
                    warn!(client, %reply, "Gateway panic reported, closing client");
                    break;
                }
            }
            inbound = socket.recv() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(payload) => {
                            if let Err(e) = state.bus.publish(&id, &payload).await {
                                warn!(client, topic = %id, %e, "Publish failed");
                            }
                        }
                        Err(e) => warn!(client, %e, "Invalid JSON from client"),
                    },
                    Message::Binary(_) => warn!(client, "Binary frames are not supported"),
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    if let Some(unused) = state.routes.remove(client) {
        if let Err(e) = state.bus.unsubscribe(&unused).await {
            debug!(pattern = %unused, %e, "Unsubscribe failed");
        }
    }
    let _ = socket.send(Message::Close(None)).await;
    info!(client, "WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use s3x_bus::MemoryBroker;
    use serde_json::json;
    use tokio::time::{sleep, timeout, Duration};
    use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

    async fn start(broker: &MemoryBroker) -> WsGatewayHandle {
        WsGateway::new("127.0.0.1:0".parse().unwrap(), Arc::new(broker.client()))
            .spawn()
            .await
            .unwrap()
    }

    async fn next_json<S>(socket: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match message {
            WsMessage::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_publishes_and_receives() {
        let broker = MemoryBroker::new();
        let handle = start(&broker).await;
        let url = format!("ws://{}/", handle.local_addr());
        let (mut socket, _) = connect_async(&url).await.unwrap();

        socket
            .send(WsMessage::Text(json!({"id": "to_arduino_gateway"}).to_string().into()))
            .await
            .unwrap();
        socket
            .send(WsMessage::Text(
                json!({"command": "digital_write", "pin": 13, "value": 1}).to_string().into(),
            ))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        let published = broker.published_matching("to_arduino_gateway");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload["pin"], 13);
        assert_eq!(broker.subscriber_count("from_arduino_gateway/#"), 1);

        let gateway = broker.client();
        gateway.connect().await.unwrap();
        gateway
            .publish(
                "from_arduino_gateway/2",
                &json!({
                    "report": "digital_input",
                    "pin": 2,
                    "value": 1.0,
                    "timestamp": 1_700_000_000.0,
                }),
            )
            .await
            .unwrap();

        let forwarded = next_json(&mut socket).await;
        assert_eq!(forwarded["pin"], 2);
        assert!(forwarded["timestamp"].is_string());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_id_closes_connection() {
        let broker = MemoryBroker::new();
        let handle = start(&broker).await;
        let url = format!("ws://{}/ws", handle.local_addr());
        let (mut socket, _) = connect_async(&url).await.unwrap();

        socket
            .send(WsMessage::Text(json!({"name": "scratch"}).to_string().into()))
            .await
            .unwrap();

        let closed = timeout(Duration::from_secs(2), async {
            loop {
                match socket.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return true,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .unwrap();
        assert!(closed);
        assert_eq!(handle.client_count(), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_subscribe_closes_client_and_later_client_retries() {
        let broker = MemoryBroker::new();
        let handle = start(&broker).await;
        let url = format!("ws://{}/", handle.local_addr());
        let hello = json!({"id": "to_pico_gateway"}).to_string();

        broker.set_available(false);
        let (mut rejected, _) = connect_async(&url).await.unwrap();
        rejected
            .send(WsMessage::Text(hello.clone().into()))
            .await
            .unwrap();
        let end = timeout(Duration::from_secs(2), async {
            loop {
                match rejected.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(end.is_ok());
        assert_eq!(handle.client_count(), 0);

        broker.set_available(true);
        let (mut socket, _) = connect_async(&url).await.unwrap();
        socket.send(WsMessage::Text(hello.into())).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.subscriber_count("from_pico_gateway/#"), 1);

        let gateway = broker.client();
        gateway.connect().await.unwrap();
        gateway
            .publish("from_pico_gateway/26", &json!({"report": "analog_input", "pin": 26}))
            .await
            .unwrap();
        assert_eq!(next_json(&mut socket).await["pin"], 26);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_closes_client_and_unsubscribes() {
        let broker = MemoryBroker::new();
        let handle = start(&broker).await;
        let url = format!("ws://{}/", handle.local_addr());
        let (mut socket, _) = connect_async(&url).await.unwrap();
        socket
            .send(WsMessage::Text(json!({"id": "to_esp32_gateway"}).to_string().into()))
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        let gateway = broker.client();
        gateway.connect().await.unwrap();
        gateway
            .publish("from_esp32_gateway", &json!({"report": "panic"}))
            .await
            .unwrap();

        assert_eq!(next_json(&mut socket).await["report"], "panic");
        let end = timeout(Duration::from_secs(2), socket.next()).await.unwrap();
        assert!(matches!(end, None | Some(Err(_)) | Some(Ok(WsMessage::Close(_)))));

        sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.client_count(), 0);
        assert_eq!(broker.subscriber_count("from_esp32_gateway/#"), 0);

        handle.shutdown().await.unwrap();
    }
}
