//! s3x-device - Device driver adapters for s3x gateways
//!
//! This crate provides the [`DeviceDriver`] implementations a gateway can be
//! started with. The hardware family is selected once at process start;
//! everything above the driver is family-agnostic.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                DeviceDriver                  │
//! │  set_pin_mode / write / read / callbacks     │
//! └───────────────┬──────────────────────────────┘
//!                 │
//!        ┌────────┴─────────┐
//!        ▼                  ▼
//!  TcpDeviceDriver    MockDeviceDriver
//!  (JSON lines over   (simulated device,
//!   TCP / bridge)      call recording)
//! ```

pub mod config;
pub mod driver;

pub use config::{DeviceConfig, MockConfig, PinCapabilityOverride, TcpConfig, TransportConfig};
pub use driver::{create_driver, mock::DriverCall, mock::MockDeviceDriver, tcp::TcpDeviceDriver};

// Re-export for convenience
pub use s3x_core::{
    CapabilityTable, DeviceDriver, DeviceError, DeviceEvent, DeviceFamily, PinMode, PinNumber,
    PinReport, PinValue,
};
