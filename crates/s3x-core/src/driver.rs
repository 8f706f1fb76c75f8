//! DeviceDriver trait - the single polymorphism point across hardware families

use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::capability::{CapabilityTable, DeviceFamily};
use crate::error::DeviceError;
use crate::models::{PinMode, PinNumber, PinValue};

/// Raw asynchronous reading from the device
#[derive(Debug, Clone, PartialEq)]
pub struct PinReport {
    pub pin: PinNumber,
    pub value: PinValue,
    /// When the driver received the reading
    pub received_at: Instant,
}

impl PinReport {
    pub fn new(pin: PinNumber, value: PinValue) -> Self {
        Self {
            pin,
            value,
            received_at: Instant::now(),
        }
    }
}

/// Events emitted by a driver on its event channel
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Value reported for a pin with a registered callback
    Report(PinReport),
    /// The transport session dropped
    Disconnected { reason: String },
}

/// Uniform capability interface over one hardware family's control protocol.
///
/// Every operation validates against [`DeviceDriver::capabilities`] first and
/// fails with `InvalidPin` / `UnsupportedMode` without touching the hardware.
/// Operations other than `connect` fail with `NotReady` while disconnected.
///
/// Asynchronous readings for pins registered with
/// [`DeviceDriver::register_callback`] are delivered as
/// [`DeviceEvent::Report`] on the channel returned by
/// [`DeviceDriver::events`].
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Hardware family this driver speaks to
    fn family(&self) -> DeviceFamily;

    /// Pins and modes supported by the device
    fn capabilities(&self) -> &CapabilityTable;

    /// Open the transport session
    async fn connect(&self) -> Result<(), DeviceError>;

    /// Close the transport session
    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Check whether the session is up
    async fn is_connected(&self) -> bool;

    /// Configure a pin's mode
    async fn set_pin_mode(&self, pin: PinNumber, mode: PinMode) -> Result<(), DeviceError>;

    /// Write a value to an output pin
    async fn write(&self, pin: PinNumber, value: PinValue) -> Result<(), DeviceError>;

    /// Read back the latched value of an output pin
    async fn read(&self, pin: PinNumber) -> Result<PinValue, DeviceError>;

    /// Enable asynchronous reporting for an input pin
    async fn register_callback(&self, pin: PinNumber) -> Result<(), DeviceError>;

    /// Disable asynchronous reporting for a pin
    async fn unregister_callback(&self, pin: PinNumber) -> Result<(), DeviceError>;

    /// Reset the device to its power-on state
    async fn reset(&self) -> Result<(), DeviceError>;

    /// Subscribe to reports and connection events
    fn events(&self) -> broadcast::Receiver<DeviceEvent>;
}
