//! WebSocket client driving a gateway through the bridge
//!
//! Run with: cargo test -p s3x-tests --test ws_bridge_test

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use s3x_bus::{BusConfig, MemoryBroker};
use s3x_core::{DeviceFamily, PinMode};
use s3x_device::MockDeviceDriver;
use s3x_gateway::{GatewayConfig, GatewaySupervisor, SupervisorState};
use s3x_ws::WsGateway;

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_editor_round_trip_through_bridge() {
    let broker = MemoryBroker::new();

    // Device gateway
    let driver = Arc::new(MockDeviceDriver::for_family(DeviceFamily::Arduino));
    let config = GatewayConfig {
        bus: BusConfig::Memory,
        ..Default::default()
    };
    let supervisor = GatewaySupervisor::new(config, driver.clone(), Arc::new(broker.client()));
    let monitor = supervisor.monitor();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = tokio::spawn(supervisor.run(shutdown_rx));
    assert!(monitor.wait_for(SupervisorState::Connected).await);

    // WebSocket bridge
    let bridge = WsGateway::new("127.0.0.1:0".parse().unwrap(), Arc::new(broker.client()))
        .spawn()
        .await
        .unwrap();
    let url = format!("ws://{}/", bridge.local_addr());
    let (mut socket, _) = connect_async(&url).await.unwrap();

    socket
        .send(Message::Text(json!({"id": "to_arduino_gateway"}).to_string().into()))
        .await
        .unwrap();
    socket
        .send(Message::Text(
            json!({"command": "set_mode_digital_input", "pin": 2}).to_string().into(),
        ))
        .await
        .unwrap();

    eventually(|| driver.is_reporting(2)).await;
    assert_eq!(driver.device_mode(2), PinMode::Input);

    assert!(driver.inject_report(2, 1.0));

    let message = timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let event: Value = match message {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    };
    assert_eq!(event["report"], "digital_input");
    assert_eq!(event["pin"], 2);
    assert_eq!(event["value"], 1.0);
    assert_eq!(event["sequence"], 1);
    // rewritten for display
    assert!(event["timestamp"].is_string());

    shutdown_tx.send(true).unwrap();
    assert!(gateway.await.unwrap().is_ok());
    bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_gateway_panic_closes_editor() {
    let broker = MemoryBroker::new();

    let driver = Arc::new(MockDeviceDriver::for_family(DeviceFamily::Arduino));
    let mut config = GatewayConfig {
        bus: BusConfig::Memory,
        ..Default::default()
    };
    config.supervisor.max_retries = 1;
    config.supervisor.backoff.initial_ms = 10;
    let supervisor = GatewaySupervisor::new(config, driver.clone(), Arc::new(broker.client()));
    let monitor = supervisor.monitor();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = tokio::spawn(supervisor.run(shutdown_rx));
    assert!(monitor.wait_for(SupervisorState::Connected).await);

    let bridge = WsGateway::new("127.0.0.1:0".parse().unwrap(), Arc::new(broker.client()))
        .spawn()
        .await
        .unwrap();
    let url = format!("ws://{}/ws", bridge.local_addr());
    let (mut socket, _) = connect_async(&url).await.unwrap();
    socket
        .send(Message::Text(json!({"id": "to_arduino_gateway"}).to_string().into()))
        .await
        .unwrap();
    eventually(|| bridge.client_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Board gone for good
    driver.fail_next_connects(u32::MAX);
    driver.drop_connection("power loss");
    assert!(gateway.await.unwrap().is_err());

    let mut saw_panic = false;
    loop {
        match timeout(Duration::from_secs(5), socket.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => {
                let payload: Value = serde_json::from_str(text.as_str()).unwrap();
                saw_panic |= payload["report"] == "panic";
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
    assert!(saw_panic);

    bridge.shutdown().await.unwrap();
}
