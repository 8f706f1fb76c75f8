//! Telemetry reporter
//!
//! Consumes device reports, applies them to the pin state table, coalesces
//! analog readings and publishes telemetry events. A single task does all
//! publishing, so events of one pin leave in sequence order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use s3x_core::{DeviceEvent, GatewayError, PinNumber, PinReport, TelemetryEvent};

use crate::coalescer::Coalescer;
use crate::config::TopicConfig;
use crate::pin_table::PinStateTable;
use crate::publisher::BusPublisher;

enum ReporterCommand {
    /// Publish a pin's pending coalesced value now
    Flush(PinNumber),
    /// Publish an event produced outside the device callback path
    Publish(TelemetryEvent),
    /// Publish everything pending and stop
    Drain(oneshot::Sender<usize>),
}

/// Handle for feeding the reporter task
#[derive(Clone)]
pub struct ReporterHandle {
    tx: mpsc::UnboundedSender<ReporterCommand>,
}

impl ReporterHandle {
    pub fn flush(&self, pin: PinNumber) {
        let _ = self.tx.send(ReporterCommand::Flush(pin));
    }

    pub fn publish(&self, event: TelemetryEvent) {
        let _ = self.tx.send(ReporterCommand::Publish(event));
    }

    /// Publish pending values and stop the task. Returns how many events
    /// the drain published, or `None` if the task was already gone or the
    /// timeout expired.
    pub async fn drain(&self, timeout: Duration) -> Option<usize> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(ReporterCommand::Drain(ack_tx)).ok()?;
        tokio::time::timeout(timeout, ack_rx).await.ok()?.ok()
    }
}

pub struct TelemetryReporter {
    pins: Arc<PinStateTable>,
    publisher: Arc<BusPublisher>,
    topics: TopicConfig,
    coalescer: Coalescer,
}

impl TelemetryReporter {
    pub fn new(
        pins: Arc<PinStateTable>,
        publisher: Arc<BusPublisher>,
        topics: TopicConfig,
        coalesce_window: Duration,
    ) -> Self {
        Self {
            pins,
            publisher,
            topics,
            coalescer: Coalescer::new(coalesce_window),
        }
    }

    /// Start the reporter task. Connection-class publish failures are sent
    /// on `faults`.
    pub fn spawn(
        self,
        events: broadcast::Receiver<DeviceEvent>,
        faults: mpsc::Sender<GatewayError>,
    ) -> (ReporterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(events, rx, faults));
        (ReporterHandle { tx }, handle)
    }

    async fn run(
        mut self,
        mut events: broadcast::Receiver<DeviceEvent>,
        mut commands: mpsc::UnboundedReceiver<ReporterCommand>,
        faults: mpsc::Sender<GatewayError>,
    ) {
        debug!(
            window_ms = self.coalescer.window().as_millis() as u64,
            "Telemetry reporter started"
        );
        let mut events_open = true;

        loop {
            let next_due = self.coalescer.next_due();
            let window_closed = async move {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ReporterCommand::Flush(pin)) => {
                        if let Some(event) = self.coalescer.take(pin) {
                            self.publish(event, &faults).await;
                        }
                    }
                    Some(ReporterCommand::Publish(event)) => {
                        let ready = self.coalescer.offer(event, Instant::now());
                        self.publish_all(ready, &faults).await;
                    }
                    Some(ReporterCommand::Drain(ack)) => {
                        let pending = self.coalescer.drain();
                        let count = pending.len();
                        self.publish_all(pending, &faults).await;
                        let _ = ack.send(count);
                        break;
                    }
                    None => {
                        let pending = self.coalescer.drain();
                        self.publish_all(pending, &faults).await;
                        break;
                    }
                },

                _ = window_closed => {
                    let ready = self.coalescer.due(Instant::now());
                    self.publish_all(ready, &faults).await;
                }

                event = events.recv(), if events_open => match event {
                    Ok(DeviceEvent::Report(report)) => self.handle_report(report, &faults).await,
                    Ok(DeviceEvent::Disconnected { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Telemetry reporter lagged, device reports dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Device event channel closed");
                        events_open = false;
                    }
                },
            }
        }

        info!("Telemetry reporter stopped");
    }

    async fn handle_report(&mut self, report: PinReport, faults: &mpsc::Sender<GatewayError>) {
        let Some(event) = self.pins.record_report(report.pin, report.value) else {
            debug!(pin = report.pin, "Report for pin not in a reporting mode, ignored");
            return;
        };
        trace!(pin = report.pin, value = report.value, sequence = event.sequence, "Report");

        let ready = self.coalescer.offer(event, Instant::now());
        self.publish_all(ready, faults).await;
    }

    async fn publish_all(&self, events: Vec<TelemetryEvent>, faults: &mpsc::Sender<GatewayError>) {
        for event in events {
            self.publish(event, faults).await;
        }
    }

    async fn publish(&self, event: TelemetryEvent, faults: &mpsc::Sender<GatewayError>) {
        let topic = self
            .topics
            .event_topic(self.pins.device_id(), event.key.pin);

        match self.publisher.publish(&topic, &event.to_payload()).await {
            Ok(()) => {}
            Err(e) if e.is_connection_fault() => {
                warn!(%topic, %e, "Bus lost while publishing telemetry");
                let _ = faults.try_send(e);
            }
            Err(e) => {
                debug!(%topic, sequence = event.sequence, %e, "Telemetry event dropped");
            }
        }
    }
}
