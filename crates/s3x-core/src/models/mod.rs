//! Data models shared between the gateway components

mod command;
mod connection;
mod pin;
mod telemetry;

pub use command::{Command, CommandKind};
pub use connection::{ConnectionState, DeviceConnection};
pub use pin::{Pin, PinKey, PinMode, PinNumber, PinValue};
pub use telemetry::{ReportKind, TelemetryEvent};
