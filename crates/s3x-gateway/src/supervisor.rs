//! Gateway supervisor
//!
//! Owns the device connection and drives the lifecycle:
//!
//! - `Connecting`: connect device and bus; a failure counts against the
//!   retry budget and moves to `Faulted`.
//! - `Connected`: subscribe to the command topic, restore pin modes, output
//!   values and callbacks, run the reporter and dispatch commands one at a
//!   time. A shutdown abandons a pending read but lets writes finish.
//!   Device disconnects, failed health checks and bus escalations end the
//!   session and move to `Faulted`.
//! - `Faulted`: back off and reconnect, or give up with `RetryExhausted`
//!   once the budget is spent.
//! - `ShuttingDown`: flush telemetry, unsubscribe, release the device and
//!   the bus, then `Stopped`.
//!
//! A shutdown signal is honored from every state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use s3x_bus::create_bus;
use s3x_core::topic;
use s3x_core::{
    BusClient, CommandKind, DeviceConnection, DeviceDriver, DeviceEvent, GatewayError,
    GatewayResult, PinMode,
};
use s3x_device::create_driver;

use crate::config::GatewayConfig;
use crate::pin_table::PinStateTable;
use crate::publisher::BusPublisher;
use crate::reporter::TelemetryReporter;
use crate::state::SupervisorState;
use crate::translator::CommandTranslator;
use crate::vocabulary::Vocabulary;

/// Why a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Fault(GatewayError),
}

/// Read-only view of a running supervisor
#[derive(Clone)]
pub struct SupervisorMonitor {
    state_rx: watch::Receiver<SupervisorState>,
    connection_rx: watch::Receiver<DeviceConnection>,
    history: Arc<RwLock<Vec<SupervisorState>>>,
}

impl SupervisorMonitor {
    /// Current state
    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// Every state entered so far, in order
    pub fn history(&self) -> Vec<SupervisorState> {
        self.history.read().clone()
    }

    /// Snapshot of the device connection record
    pub fn connection(&self) -> DeviceConnection {
        self.connection_rx.borrow().clone()
    }

    /// Wait until `state` has been entered at least `count` times.
    /// Returns false if the supervisor went away first.
    pub async fn wait_for_nth(&self, state: SupervisorState, count: usize) -> bool {
        let mut rx = self.state_rx.clone();
        loop {
            let seen = self.history.read().iter().filter(|s| **s == state).count();
            if seen >= count {
                return true;
            }
            if rx.changed().await.is_err() {
                return self.history.read().iter().filter(|s| **s == state).count() >= count;
            }
        }
    }

    /// Wait until `state` has been entered
    pub async fn wait_for(&self, state: SupervisorState) -> bool {
        self.wait_for_nth(state, 1).await
    }
}

pub struct GatewaySupervisor {
    config: GatewayConfig,
    device_id: String,
    driver: Arc<dyn DeviceDriver>,
    bus: Arc<dyn BusClient>,
    pins: Arc<PinStateTable>,
    vocabulary: Arc<Vocabulary>,
    publisher: Arc<BusPublisher>,
    connection: DeviceConnection,
    state: SupervisorState,
    state_tx: watch::Sender<SupervisorState>,
    connection_tx: watch::Sender<DeviceConnection>,
    history: Arc<RwLock<Vec<SupervisorState>>>,
    sessions: u32,
}

impl GatewaySupervisor {
    pub fn new(
        config: GatewayConfig,
        driver: Arc<dyn DeviceDriver>,
        bus: Arc<dyn BusClient>,
    ) -> Self {
        let device_id = config.device.device_id();
        let connection = DeviceConnection::new(device_id.clone());
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        let (connection_tx, _) = watch::channel(connection.clone());

        Self {
            pins: Arc::new(PinStateTable::new(device_id.clone())),
            vocabulary: Arc::new(Vocabulary::new(&config.vocabulary)),
            publisher: Arc::new(BusPublisher::new(
                bus.clone(),
                config.supervisor.bus_failure_threshold,
            )),
            config,
            device_id,
            driver,
            bus,
            connection,
            state: SupervisorState::Idle,
            state_tx,
            connection_tx,
            history: Arc::new(RwLock::new(vec![SupervisorState::Idle])),
            sessions: 0,
        }
    }

    /// Build driver and bus client from configuration
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let driver = create_driver(&config.device)?;
        let bus = create_bus(&config.bus)?;
        Ok(Self::new(config, driver, bus))
    }

    pub fn monitor(&self) -> SupervisorMonitor {
        SupervisorMonitor {
            state_rx: self.state_tx.subscribe(),
            connection_rx: self.connection_tx.subscribe(),
            history: self.history.clone(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn pins(&self) -> Arc<PinStateTable> {
        self.pins.clone()
    }

    pub fn connection(&self) -> &DeviceConnection {
        &self.connection
    }

    /// Run until shutdown or terminal failure.
    ///
    /// Returns `Ok` after a requested shutdown and
    /// `Err(GatewayError::RetryExhausted)` when reconnecting gave up.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> GatewayResult<()> {
        info!(
            device = %self.device_id,
            family = %self.driver.family(),
            bus = self.bus.name(),
            pins = self.driver.capabilities().len(),
            "Gateway supervisor starting"
        );
        let mut outcome: GatewayResult<()> = Ok(());

        loop {
            if *shutdown.borrow() && !self.state.is_final() {
                info!(state = %self.state, "Shutdown requested");
                self.transition(SupervisorState::ShuttingDown);
            }

            match self.state {
                SupervisorState::Idle => self.transition(SupervisorState::Connecting),
                SupervisorState::Connecting => self.connecting(&mut shutdown).await,
                SupervisorState::Connected => self.connected(&mut shutdown).await,
                SupervisorState::Faulted => {
                    if let Err(e) = self.faulted(&mut shutdown).await {
                        outcome = Err(e);
                    }
                }
                SupervisorState::ShuttingDown => {
                    self.shutting_down(outcome.is_err()).await;
                    self.transition(SupervisorState::Stopped);
                }
                SupervisorState::Stopped => break,
            }
        }

        match &outcome {
            Ok(()) => info!("Gateway stopped"),
            Err(e) => error!(%e, "Gateway stopped after terminal failure"),
        }
        outcome
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "Supervisor transition");
        self.state = next;
        self.history.write().push(next);
        self.state_tx.send_replace(next);
    }

    fn publish_connection(&self) {
        self.connection_tx.send_replace(self.connection.clone());
    }

    async fn connecting(&mut self, shutdown: &mut watch::Receiver<bool>) {
        self.connection.mark_connecting();
        self.publish_connection();

        let result = tokio::select! {
            result = self.connect_transports() => Some(result),
            _ = wait_for_shutdown(shutdown) => None,
        };

        match result {
            None => self.transition(SupervisorState::ShuttingDown),
            Some(Ok(())) => {
                self.connection.mark_connected();
                self.publish_connection();
                self.transition(SupervisorState::Connected);
            }
            Some(Err(e)) => {
                self.connection.mark_faulted(true);
                self.publish_connection();
                warn!(
                    attempt = self.connection.retry_count,
                    max_retries = self.config.supervisor.max_retries,
                    %e,
                    "Connection attempt failed"
                );
                self.transition(SupervisorState::Faulted);
            }
        }
    }

    async fn connect_transports(&self) -> GatewayResult<()> {
        self.driver.connect().await?;

        if !self.bus.is_connected().await {
            if let Err(e) = self.bus.connect().await {
                let _ = self.driver.disconnect().await;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn connected(&mut self, shutdown: &mut watch::Receiver<bool>) {
        match self.run_session(shutdown).await {
            SessionEnd::Shutdown => self.transition(SupervisorState::ShuttingDown),
            SessionEnd::Fault(e) => {
                warn!(%e, "Connection fault, reconnecting");
                self.connection.mark_faulted(false);
                self.publish_connection();

                if let Err(e) = self.driver.disconnect().await {
                    debug!(%e, "Device disconnect after fault failed");
                }
                if matches!(e, GatewayError::BusConnectionLost(_)) {
                    if let Err(e) = self.bus.disconnect().await {
                        debug!(%e, "Bus disconnect after fault failed");
                    }
                }
                self.transition(SupervisorState::Faulted);
            }
        }
    }

    async fn faulted(&mut self, shutdown: &mut watch::Receiver<bool>) -> GatewayResult<()> {
        let retries = self.connection.retry_count;
        let max_retries = self.config.supervisor.max_retries;

        if retries >= max_retries {
            error!(attempts = retries, "Reconnect attempts exhausted");
            self.transition(SupervisorState::ShuttingDown);
            return Err(GatewayError::RetryExhausted { attempts: retries });
        }

        let delay = self
            .config
            .supervisor
            .backoff
            .delay(retries.saturating_sub(1));
        info!(
            delay_ms = delay.as_millis() as u64,
            retry_count = retries,
            "Reconnecting after backoff"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => self.transition(SupervisorState::Connecting),
            _ = wait_for_shutdown(shutdown) => self.transition(SupervisorState::ShuttingDown),
        }
        Ok(())
    }

    async fn shutting_down(&mut self, terminal: bool) {
        if terminal && self.bus.is_connected().await {
            let status_topic = self.config.topics.status_topic(&self.device_id);
            let panic = json!({ "report": "panic", "device": self.device_id });
            if let Err(e) = self.bus.publish(&status_topic, &panic).await {
                debug!(%e, "Panic report not delivered");
            }
        }

        if let Err(e) = self.driver.disconnect().await {
            warn!(%e, "Device disconnect failed");
        }
        if let Err(e) = self.bus.disconnect().await {
            warn!(%e, "Bus disconnect failed");
        }
        self.connection.mark_disconnected();
        self.publish_connection();
    }

    /// Re-apply modes, output values and callbacks after (re)connecting.
    /// The device comes back in its power-on state.
    async fn restore_pins(&self) -> GatewayResult<usize> {
        let mut restored = 0;
        for pin in self.pins.snapshot() {
            if pin.mode == PinMode::Disabled {
                continue;
            }
            let number = pin.key.pin;

            let result = async {
                self.driver.set_pin_mode(number, pin.mode).await?;
                if let (true, Some(value)) = (pin.mode.is_writable(), pin.last_value) {
                    self.driver.write(number, value).await?;
                }
                if pin.reporting {
                    self.driver.register_callback(number).await?;
                }
                Ok::<(), GatewayError>(())
            }
            .await;

            match result {
                Ok(()) => restored += 1,
                Err(e) if e.is_connection_fault() || matches!(e, GatewayError::DeviceNotReady) => {
                    return Err(GatewayError::DeviceConnectionLost(e.to_string()));
                }
                Err(e) => warn!(pin = number, %e, "Failed to restore pin"),
            }
        }
        Ok(restored)
    }

    async fn run_session(&mut self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        self.sessions += 1;
        let command_topic = self.config.topics.command_topic(&self.device_id);
        let mut commands = self.bus.messages();
        let mut device_events = self.driver.events();
        // taken before the restore so replies to its registrations reach the reporter
        let reporter_events = self.driver.events();

        if let Err(e) = self.bus.subscribe(&command_topic).await {
            return SessionEnd::Fault(GatewayError::BusConnectionLost(e.to_string()));
        }

        if self.sessions > 1 {
            self.pins.mark_discontinuity();
        }
        match self.restore_pins().await {
            Ok(0) => {}
            Ok(restored) => info!(restored, "Pin configuration restored"),
            Err(e) => {
                let _ = self.bus.unsubscribe(&command_topic).await;
                return SessionEnd::Fault(e);
            }
        }
        self.publisher.reset();

        let (fault_tx, mut fault_rx) = mpsc::channel(8);
        let reporter = TelemetryReporter::new(
            self.pins.clone(),
            self.publisher.clone(),
            self.config.topics.clone(),
            self.config.telemetry.coalesce_window(),
        );
        let (reporter_handle, reporter_task) = reporter.spawn(reporter_events, fault_tx);
        let translator = CommandTranslator::new(
            self.driver.clone(),
            self.pins.clone(),
            self.vocabulary.clone(),
        )
        .with_reporter(reporter_handle.clone());

        let mut health = health_interval(self.config.supervisor.health_check_interval_ms);
        info!(topic = %command_topic, "Gateway connected, accepting commands");

        let end = loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => break SessionEnd::Shutdown,

                Some(fault) = fault_rx.recv() => break SessionEnd::Fault(fault),

                event = device_events.recv() => match event {
                    Ok(DeviceEvent::Disconnected { reason }) => {
                        break SessionEnd::Fault(GatewayError::DeviceConnectionLost(reason));
                    }
                    Ok(DeviceEvent::Report(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => {
                        break SessionEnd::Fault(GatewayError::DeviceConnectionLost(
                            "device event channel closed".to_string(),
                        ));
                    }
                },

                message = commands.recv() => match message {
                    Ok(message) => {
                        if !topic::matches(&command_topic, &message.topic) {
                            continue;
                        }
                        let command = match self.vocabulary.parse(&message) {
                            Ok(command) => command,
                            Err(e) => {
                                warn!(topic = %message.topic, %e, "Command rejected");
                                continue;
                            }
                        };
                        // Reads are dropped on shutdown; writes run to completion
                        let result = if matches!(command.kind, CommandKind::ReadRequest) {
                            tokio::select! {
                                _ = wait_for_shutdown(shutdown) => {
                                    debug!(pin = command.pin, "Pending read cancelled");
                                    break SessionEnd::Shutdown;
                                }
                                result = translator.execute(&command) => result,
                            }
                        } else {
                            translator.execute(&command).await
                        };
                        if let Err(e) = result {
                            if e.is_connection_fault() {
                                break SessionEnd::Fault(e);
                            }
                            warn!(topic = %message.topic, %e, "Command rejected");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Command queue lagged, commands dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break SessionEnd::Fault(GatewayError::BusConnectionLost(
                            "bus message channel closed".to_string(),
                        ));
                    }
                },

                _ = tick(&mut health) => {
                    if !self.driver.is_connected().await {
                        break SessionEnd::Fault(GatewayError::DeviceConnectionLost(
                            "health check failed".to_string(),
                        ));
                    }
                    if !self.bus.is_connected().await {
                        break SessionEnd::Fault(GatewayError::BusConnectionLost(
                            "bus health check failed".to_string(),
                        ));
                    }
                }
            }
        };

        let drain_timeout = Duration::from_millis(self.config.supervisor.drain_timeout_ms);
        match reporter_handle.drain(drain_timeout).await {
            Some(flushed) => debug!(flushed, "Telemetry drained"),
            None => {
                warn!("Telemetry drain timed out");
                reporter_task.abort();
            }
        }
        if let Err(e) = self.bus.unsubscribe(&command_topic).await {
            debug!(%e, "Unsubscribe failed");
        }
        end
    }
}

fn health_interval(period_ms: u64) -> Option<Interval> {
    if period_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(period_ms);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Resolve once shutdown has been requested. A dropped sender never
/// resolves.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use s3x_bus::MemoryBroker;
    use s3x_core::{CapabilityTable, DeviceFamily};
    use s3x_device::{DriverCall, MockConfig, MockDeviceDriver};
    use serde_json::json;

    struct Harness {
        broker: MemoryBroker,
        driver: Arc<MockDeviceDriver>,
        monitor: SupervisorMonitor,
        shutdown_tx: watch::Sender<bool>,
        task: tokio::task::JoinHandle<GatewayResult<()>>,
    }

    fn start(config: GatewayConfig, driver: MockDeviceDriver) -> Harness {
        let broker = MemoryBroker::new();
        let driver = Arc::new(driver);
        let supervisor =
            GatewaySupervisor::new(config, driver.clone(), Arc::new(broker.client()));
        let monitor = supervisor.monitor();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));

        Harness {
            broker,
            driver,
            monitor,
            shutdown_tx,
            task,
        }
    }

    fn arduino_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.bus = s3x_bus::BusConfig::Memory;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_shutdown() {
        let h = start(
            arduino_config(),
            MockDeviceDriver::for_family(DeviceFamily::Arduino),
        );
        assert!(h.monitor.wait_for(SupervisorState::Connected).await);
        assert_eq!(h.broker.subscriber_count("to_arduino_gateway"), 1);

        h.shutdown_tx.send(true).unwrap();
        assert!(h.task.await.unwrap().is_ok());
        assert_eq!(
            h.monitor.history(),
            vec![
                SupervisorState::Idle,
                SupervisorState::Connecting,
                SupervisorState::Connected,
                SupervisorState::ShuttingDown,
                SupervisorState::Stopped,
            ]
        );
        assert!(!h.driver.is_connected().await);
        assert_eq!(h.broker.subscriber_count("to_arduino_gateway"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let driver = MockDeviceDriver::for_family(DeviceFamily::Arduino);
        driver.fail_next_connects(10);
        let started = Instant::now();
        let h = start(arduino_config(), driver);

        let result = h.task.await.unwrap();
        assert!(matches!(
            result,
            Err(GatewayError::RetryExhausted { attempts: 3 })
        ));
        assert_eq!(h.driver.count_calls(|c| *c == DriverCall::Connect), 3);
        // backoff of 1 s then 2 s between the three attempts
        assert_eq!(started.elapsed().as_secs(), 3);

        let history = h.monitor.history();
        assert_eq!(history.last(), Some(&SupervisorState::Stopped));
        assert!(history.contains(&SupervisorState::Faulted));
        assert!(!history.contains(&SupervisorState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_device_drop() {
        let h = start(
            arduino_config(),
            MockDeviceDriver::for_family(DeviceFamily::Arduino),
        );
        assert!(h.monitor.wait_for(SupervisorState::Connected).await);

        h.driver.drop_connection("cable pulled");
        assert!(h.monitor.wait_for_nth(SupervisorState::Connected, 2).await);
        assert_eq!(h.monitor.connection().retry_count, 0);
        assert_eq!(h.driver.count_calls(|c| *c == DriverCall::Connect), 2);

        h.shutdown_tx.send(true).unwrap();
        assert!(h.task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let driver = MockDeviceDriver::for_family(DeviceFamily::Arduino);
        driver.fail_next_connects(1);
        let h = start(arduino_config(), driver);

        assert!(h.monitor.wait_for(SupervisorState::Faulted).await);
        h.shutdown_tx.send(true).unwrap();
        assert!(h.task.await.unwrap().is_ok());
        assert!(!h.monitor.history().contains(&SupervisorState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_read() {
        let driver = MockDeviceDriver::new(
            DeviceFamily::Arduino,
            CapabilityTable::for_family(DeviceFamily::Arduino),
            MockConfig {
                latency_ms: 10_000,
                ..Default::default()
            },
        );
        let h = start(arduino_config(), driver);
        assert!(h.monitor.wait_for(SupervisorState::Connected).await);

        let editor = h.broker.client();
        editor.connect().await.unwrap();
        editor
            .publish("to_arduino_gateway", &json!({"command": "set_mode_servo", "pin": 5}))
            .await
            .unwrap();
        while h.driver.device_mode(5) != PinMode::Servo {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        editor
            .publish("to_arduino_gateway", &json!({"command": "read-request", "pin": 5}))
            .await
            .unwrap();
        while h.driver.count_calls(|c| *c == DriverCall::Read(5)) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let started = Instant::now();
        h.shutdown_tx.send(true).unwrap();
        assert!(h.task.await.unwrap().is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(h.broker.published_matching("from_arduino_gateway/5").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_report_on_terminal_failure() {
        let mut config = arduino_config();
        config.supervisor.max_retries = 1;
        let broker = MemoryBroker::new();
        let driver = Arc::new(MockDeviceDriver::for_family(DeviceFamily::Arduino));
        let bus = Arc::new(broker.client());
        let supervisor = GatewaySupervisor::new(config, driver.clone(), bus);

        // Connect once, then make every reconnect fail
        let monitor = supervisor.monitor();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervisor.run(shutdown_rx));
        assert!(monitor.wait_for(SupervisorState::Connected).await);

        driver.fail_next_connects(5);
        driver.drop_connection("brownout");

        assert!(task.await.unwrap().is_err());
        let status = broker.published_matching("from_arduino_gateway");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].payload["report"], "panic");
    }
}
