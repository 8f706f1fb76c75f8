//! Mock device driver for testing and demos

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use s3x_core::{
    CapabilityTable, DeviceDriver, DeviceError, DeviceEvent, DeviceFamily, PinMode, PinNumber,
    PinReport, PinValue,
};

use crate::config::MockConfig;

/// One recorded adapter invocation
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Connect,
    Disconnect,
    SetPinMode(PinNumber, PinMode),
    Write(PinNumber, PinValue),
    Read(PinNumber),
    RegisterCallback(PinNumber),
    UnregisterCallback(PinNumber),
    Reset,
}

/// Simulated device.
///
/// Records every call so tests can assert on call counts and order, and lets
/// tests inject readings, drop the connection, or fail connection attempts.
pub struct MockDeviceDriver {
    family: DeviceFamily,
    capabilities: CapabilityTable,
    config: MockConfig,
    connected: Arc<AtomicBool>,
    fail_connects: AtomicU32,
    calls: RwLock<Vec<DriverCall>>,
    modes: RwLock<HashMap<PinNumber, PinMode>>,
    latched: RwLock<HashMap<PinNumber, PinValue>>,
    /// Pins with a registered callback and the mode they report in
    reporting: Arc<RwLock<HashMap<PinNumber, PinMode>>>,
    events_tx: broadcast::Sender<DeviceEvent>,
    synthetic_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MockDeviceDriver {
    pub fn new(family: DeviceFamily, capabilities: CapabilityTable, config: MockConfig) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            family,
            capabilities,
            fail_connects: AtomicU32::new(config.fail_connects),
            config,
            connected: Arc::new(AtomicBool::new(false)),
            calls: RwLock::new(Vec::new()),
            modes: RwLock::new(HashMap::new()),
            latched: RwLock::new(HashMap::new()),
            reporting: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            synthetic_handle: Mutex::new(None),
        }
    }

    /// Mock for a family with its default capability table
    pub fn for_family(family: DeviceFamily) -> Self {
        Self::new(
            family,
            CapabilityTable::for_family(family),
            MockConfig::default(),
        )
    }

    /// All calls recorded so far
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.read().clone()
    }

    /// Calls excluding connection management
    pub fn pin_calls(&self) -> Vec<DriverCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| !matches!(c, DriverCall::Connect | DriverCall::Disconnect))
            .cloned()
            .collect()
    }

    pub fn count_calls(&self, predicate: impl Fn(&DriverCall) -> bool) -> usize {
        self.calls.read().iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    /// Fail the next `n` connection attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Simulate the transport dropping
    pub fn drop_connection(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.stop_synthetic();
            let _ = self.events_tx.send(DeviceEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Inject a reading, as the device would send it. Only pins with a
    /// registered callback report; returns whether the reading was emitted.
    pub fn inject_report(&self, pin: PinNumber, value: PinValue) -> bool {
        if !self.connected.load(Ordering::SeqCst) || !self.reporting.read().contains_key(&pin) {
            return false;
        }
        let _ = self
            .events_tx
            .send(DeviceEvent::Report(PinReport::new(pin, value)));
        true
    }

    /// Current mode as the device sees it
    pub fn device_mode(&self, pin: PinNumber) -> PinMode {
        self.modes.read().get(&pin).copied().unwrap_or_default()
    }

    /// Value the device currently holds on an output pin
    pub fn latched_value(&self, pin: PinNumber) -> Option<PinValue> {
        self.latched.read().get(&pin).copied()
    }

    pub fn is_reporting(&self, pin: PinNumber) -> bool {
        self.reporting.read().contains_key(&pin)
    }

    fn record(&self, call: DriverCall) {
        self.calls.write().push(call);
    }

    fn ensure_ready(&self) -> Result<(), DeviceError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotReady)
        }
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn start_synthetic(&self) {
        if self.config.synthetic_interval_ms == 0 {
            return;
        }

        self.stop_synthetic();

        let reporting = self.reporting.clone();
        let connected = self.connected.clone();
        let events_tx = self.events_tx.clone();
        let interval = Duration::from_millis(self.config.synthetic_interval_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !connected.load(Ordering::SeqCst) {
                    break;
                }

                let readings: Vec<PinReport> = {
                    let mut rng = rand::thread_rng();
                    reporting
                        .read()
                        .iter()
                        .map(|(pin, mode)| {
                            let value = match mode {
                                PinMode::AnalogInput => rng.gen_range(0..1024) as PinValue,
                                _ => rng.gen_range(0..=1) as PinValue,
                            };
                            PinReport::new(*pin, value)
                        })
                        .collect()
                };

                for reading in readings {
                    let _ = events_tx.send(DeviceEvent::Report(reading));
                }
            }
        });

        *self.synthetic_handle.lock() = Some(handle);
        debug!(
            interval_ms = self.config.synthetic_interval_ms,
            "Mock device: synthetic readings started"
        );
    }

    fn stop_synthetic(&self) {
        if let Some(handle) = self.synthetic_handle.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl DeviceDriver for MockDeviceDriver {
    fn family(&self) -> DeviceFamily {
        self.family
    }

    fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.record(DriverCall::Connect);
        self.simulate_latency().await;

        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(DeviceError::ConnectionFailed(
                "mock device refused connection".to_string(),
            ));
        }

        // A fresh session starts from the power-on state
        self.modes.write().clear();
        self.latched.write().clear();
        self.reporting.write().clear();
        self.connected.store(true, Ordering::SeqCst);
        self.start_synthetic();
        debug!(family = %self.family, "Mock device: connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.record(DriverCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        self.stop_synthetic();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn set_pin_mode(&self, pin: PinNumber, mode: PinMode) -> Result<(), DeviceError> {
        self.record(DriverCall::SetPinMode(pin, mode));
        self.capabilities.check(pin, mode)?;
        self.ensure_ready()?;
        self.simulate_latency().await;

        self.modes.write().insert(pin, mode);
        if !mode.supports_reporting() {
            self.reporting.write().remove(&pin);
        } else if let Some(reporting_mode) = self.reporting.write().get_mut(&pin) {
            *reporting_mode = mode;
        }
        Ok(())
    }

    async fn write(&self, pin: PinNumber, value: PinValue) -> Result<(), DeviceError> {
        self.record(DriverCall::Write(pin, value));
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        let mode = self.device_mode(pin);
        if !mode.is_writable() {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }
        self.simulate_latency().await;

        self.latched.write().insert(pin, value);
        debug!(pin, value, "Mock device: write");
        Ok(())
    }

    async fn read(&self, pin: PinNumber) -> Result<PinValue, DeviceError> {
        self.record(DriverCall::Read(pin));
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        let mode = self.device_mode(pin);
        if !mode.supports_sync_read() {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }
        self.simulate_latency().await;

        Ok(self.latched.read().get(&pin).copied().unwrap_or(0.0))
    }

    async fn register_callback(&self, pin: PinNumber) -> Result<(), DeviceError> {
        self.record(DriverCall::RegisterCallback(pin));
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        let mode = self.device_mode(pin);
        if !mode.supports_reporting() {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }

        self.reporting.write().insert(pin, mode);
        Ok(())
    }

    async fn unregister_callback(&self, pin: PinNumber) -> Result<(), DeviceError> {
        self.record(DriverCall::UnregisterCallback(pin));
        self.capabilities.check_pin(pin)?;
        self.ensure_ready()?;

        self.reporting.write().remove(&pin);
        Ok(())
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.record(DriverCall::Reset);
        self.ensure_ready()?;

        self.modes.write().clear();
        self.latched.write().clear();
        self.reporting.write().clear();
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events_tx.subscribe()
    }
}

impl Drop for MockDeviceDriver {
    fn drop(&mut self) {
        if let Some(handle) = self.synthetic_handle.get_mut().take() {
            handle.abort();
        }
    }
}
