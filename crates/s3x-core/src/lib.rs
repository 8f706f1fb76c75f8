//! s3x-core - Core traits and types for s3x hardware gateways
//!
//! This crate provides the abstractions shared by every gateway process:
//! the device driver and bus client interfaces, the pin/command/telemetry
//! models, per-family capability tables and the gateway error taxonomy.
//!
//! A gateway bridges one publish/subscribe bus to one hardware device family.
//! Each hardware family supplies a [`DeviceDriver`]; each bus transport
//! supplies a [`BusClient`]. Everything above those two traits is
//! family- and transport-agnostic.

pub mod bus;
pub mod capability;
pub mod driver;
pub mod error;
pub mod models;
pub mod topic;

pub use bus::{BusClient, BusMessage};
pub use capability::{CapabilityTable, DeviceFamily};
pub use driver::{DeviceDriver, DeviceEvent, PinReport};
pub use error::{BusError, DeviceError, ErrorClass, GatewayError, GatewayResult};
pub use models::*;
