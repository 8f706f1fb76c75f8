//! TCP Device Driver Implementation

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use s3x_core::{
    CapabilityTable, DeviceDriver, DeviceError, DeviceEvent, DeviceFamily, PinMode, PinNumber,
    PinReport, PinValue,
};

use super::frame::{self, Inbound, Request};
use crate::config::TcpConfig;

type PendingReads = HashMap<u64, oneshot::Sender<Result<PinValue, DeviceError>>>;

/// State shared with the receiver task
struct Shared {
    connected: AtomicBool,
    pending: parking_lot::Mutex<PendingReads>,
    reporting: RwLock<HashSet<PinNumber>>,
    events_tx: broadcast::Sender<DeviceEvent>,
}

impl Shared {
    /// Mark the session down, fail outstanding reads and notify listeners.
    /// Only the first caller emits the event.
    fn lose_connection(&self, reason: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        warn!(%reason, "Device connection lost");
        self.fail_pending(reason);
        let _ = self.events_tx.send(DeviceEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn fail_pending(&self, reason: &str) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(DeviceError::ConnectionLost(reason.to_string())));
        }
    }
}

/// Driver for boards speaking newline-delimited JSON over TCP
pub struct TcpDeviceDriver {
    family: DeviceFamily,
    capabilities: CapabilityTable,
    config: TcpConfig,
    shared: Arc<Shared>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    modes: RwLock<HashMap<PinNumber, PinMode>>,
    next_id: AtomicU64,
    receiver_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpDeviceDriver {
    /// Create a driver; no connection is made until [`DeviceDriver::connect`]
    pub fn new(family: DeviceFamily, capabilities: CapabilityTable, config: TcpConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            family,
            capabilities,
            config,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                pending: parking_lot::Mutex::new(HashMap::new()),
                reporting: RwLock::new(HashSet::new()),
                events_tx,
            }),
            writer: Mutex::new(None),
            modes: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            receiver_handle: parking_lot::Mutex::new(None),
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn ensure_ready(&self) -> Result<(), DeviceError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotReady)
        }
    }

    fn current_mode(&self, pin: PinNumber) -> PinMode {
        self.modes.read().get(&pin).copied().unwrap_or_default()
    }

    /// Send one frame
    async fn send(&self, request: &Request) -> Result<(), DeviceError> {
        let line = frame::encode(request)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(DeviceError::NotReady)?;

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            drop(guard);
            self.shared.lose_connection(&e.to_string());
            return Err(DeviceError::ConnectionLost(e.to_string()));
        }
        Ok(())
    }

    /// Start background receiver task
    fn start_receiver(&self, reader: OwnedReadHalf) {
        let shared = self.shared.clone();

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => Self::handle_line(&shared, &line),
                    Ok(None) => {
                        shared.lose_connection("device closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!(%e, "Receive error");
                        shared.lose_connection(&e.to_string());
                        break;
                    }
                }
            }
        });

        if let Some(old) = self.receiver_handle.lock().replace(handle) {
            old.abort();
        }
    }

    /// Handle one inbound frame
    fn handle_line(shared: &Shared, line: &str) {
        match frame::decode(line) {
            Ok(Inbound::Response { id, value, error }) => {
                let Some(tx) = shared.pending.lock().remove(&id) else {
                    debug!(id, "Response for unknown or expired read");
                    return;
                };
                let result = match (value, error) {
                    (_, Some(error)) => Err(DeviceError::Protocol(error)),
                    (Some(value), None) => Ok(value),
                    (None, None) => Err(DeviceError::Protocol(format!(
                        "read response {} carries no value",
                        id
                    ))),
                };
                let _ = tx.send(result);
            }
            Ok(Inbound::Report { report, pin, value }) => {
                if report != "pin" {
                    debug!(%report, "Ignoring report kind");
                    return;
                }
                if !shared.reporting.read().contains(&pin) {
                    debug!(pin, "Report for pin without callback");
                    return;
                }
                let _ = shared
                    .events_tx
                    .send(DeviceEvent::Report(PinReport::new(pin, value)));
            }
            Ok(Inbound::Error { error }) => warn!(%error, "Device reported error"),
            Err(e) => warn!(%e, "Dropping frame"),
        }
    }
}

#[async_trait]
impl DeviceDriver for TcpDeviceDriver {
    fn family(&self) -> DeviceFamily {
        self.family
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let addr = self.address();
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        info!(%addr, family = %self.family, "Connecting to device");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DeviceError::ConnectionFailed(format!("{}: connection timeout", addr)))?
            .map_err(|e| DeviceError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        self.modes.write().clear();
        self.shared.reporting.write().clear();
        self.shared.connected.store(true, Ordering::SeqCst);
        self.start_receiver(reader);

        info!(%addr, "Device connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.shared.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver_handle.lock().take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shared.fail_pending("disconnected");
        self.shared.reporting.write().clear();
        info!(addr = %self.address(), "Device disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn set_pin_mode(&self, pin: PinNumber, mode: PinMode) -> Result<(), DeviceError> {
        self.capabilities.check(pin, mode)?;
        self.ensure_ready()?;

        self.send(&Request::SetPinMode { pin, mode }).await?;
        self.modes.write().insert(pin, mode);
        if !mode.supports_reporting() {
            self.shared.reporting.write().remove(&pin);
        }
        Ok(())
    }

    async fn write(&self, pin: PinNumber, value: PinValue) -> Result<(), DeviceError> {
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        let mode = self.current_mode(pin);
        if !mode.is_writable() {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }
        self.send(&Request::Write { pin, value }).await
    }

    async fn read(&self, pin: PinNumber) -> Result<PinValue, DeviceError> {
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        let mode = self.current_mode(pin);
        if !mode.supports_sync_read() {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        if let Err(e) = self.send(&Request::Read { id, pin }).await {
            self.shared.pending.lock().remove(&id);
            return Err(e);
        }

        let timeout = Duration::from_millis(self.config.response_timeout_ms);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DeviceError::ConnectionLost(
                "receiver stopped before response".to_string(),
            )),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(DeviceError::Timeout(format!("read of pin {}", pin)))
            }
        }
    }

    async fn register_callback(&self, pin: PinNumber) -> Result<(), DeviceError> {
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        let mode = self.current_mode(pin);
        if !mode.supports_reporting() {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }

        // Mark first: the board may answer with a reading right away
        self.shared.reporting.write().insert(pin);
        if let Err(e) = self.send(&Request::Report { pin, enable: true }).await {
            self.shared.reporting.write().remove(&pin);
            return Err(e);
        }
        Ok(())
    }

    async fn unregister_callback(&self, pin: PinNumber) -> Result<(), DeviceError> {
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        self.send(&Request::Report { pin, enable: false }).await?;
        self.shared.reporting.write().remove(&pin);
        Ok(())
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.ensure_ready()?;
        self.send(&Request::Reset).await?;
        self.modes.write().clear();
        self.shared.reporting.write().clear();
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.shared.events_tx.subscribe()
    }
}

impl Drop for TcpDeviceDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.receiver_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal board: answers reads with the last written value and reports
    /// 512 for every pin that gets reporting enabled.
    async fn spawn_fake_device() -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let mut received = Vec::new();
            let mut latched = 0.0;

            while let Ok(Some(line)) = lines.next_line().await {
                received.push(line.clone());
                let request: Request = serde_json::from_str(&line).unwrap();
                let reply = match request {
                    Request::Write { value, .. } => {
                        latched = value;
                        None
                    }
                    Request::Read { id, .. } => {
                        Some(serde_json::json!({ "id": id, "value": latched }))
                    }
                    Request::Report { pin, enable: true } => {
                        Some(serde_json::json!({ "report": "pin", "pin": pin, "value": 512 }))
                    }
                    Request::Reset => break,
                    _ => None,
                };
                if let Some(reply) = reply {
                    let line = format!("{}\n", reply);
                    writer.write_all(line.as_bytes()).await.unwrap();
                }
            }
            received
        });

        (port, handle)
    }

    fn driver(port: u16) -> TcpDeviceDriver {
        TcpDeviceDriver::new(
            DeviceFamily::Arduino,
            CapabilityTable::for_family(DeviceFamily::Arduino),
            TcpConfig::new("127.0.0.1", port),
        )
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let (port, device) = spawn_fake_device().await;
        let driver = driver(port);

        assert_eq!(driver.write(13, 1.0).await, Err(DeviceError::NotReady));

        driver.connect().await.unwrap();
        driver.set_pin_mode(13, PinMode::Output).await.unwrap();
        driver.write(13, 1.0).await.unwrap();
        assert_eq!(driver.read(13).await.unwrap(), 1.0);

        driver.reset().await.unwrap();
        let received = device.await.unwrap();
        assert_eq!(
            received[0],
            "{\"op\":\"set_pin_mode\",\"pin\":13,\"mode\":\"output\"}"
        );
        assert_eq!(received.len(), 4);
    }

    #[tokio::test]
    async fn test_reports_and_disconnect_event() {
        let (port, device) = spawn_fake_device().await;
        let driver = driver(port);
        let mut events = driver.events();

        driver.connect().await.unwrap();
        driver.set_pin_mode(14, PinMode::AnalogInput).await.unwrap();
        driver.register_callback(14).await.unwrap();

        match events.recv().await.unwrap() {
            DeviceEvent::Report(report) => {
                assert_eq!(report.pin, 14);
                assert_eq!(report.value, 512.0);
            }
            other => panic!("Expected report, got {:?}", other),
        }

        // The fake device closes the socket on reset
        driver.reset().await.unwrap();
        device.await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::Disconnected { .. }
        ));
        assert!(!driver.is_connected().await);
    }

    #[tokio::test]
    async fn test_validation_before_io() {
        let driver = driver(1);
        assert_eq!(
            driver.set_pin_mode(42, PinMode::Output).await,
            Err(DeviceError::InvalidPin(42))
        );
        assert_eq!(
            driver.set_pin_mode(2, PinMode::Pwm).await,
            Err(DeviceError::UnsupportedMode {
                pin: 2,
                mode: PinMode::Pwm
            })
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let driver = driver(port);
        assert!(matches!(
            driver.connect().await,
            Err(DeviceError::ConnectionFailed(_))
        ));
        assert!(!driver.is_connected().await);
    }
}
