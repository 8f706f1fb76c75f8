//! TCP device driver
//!
//! Talks the JSON line protocol to a board on the network, or to a
//! serial-to-TCP bridge in front of a USB-attached board.

mod adapter;
pub mod frame;

pub use adapter::TcpDeviceDriver;
