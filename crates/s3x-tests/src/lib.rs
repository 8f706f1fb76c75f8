//! Integration tests for s3x gateways
//!
//! End-to-end scenarios that run a complete gateway (supervisor, translator,
//! reporter) against the simulated device and the in-process bus.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p s3x-tests
//! ```
//!
//! # Test Structure
//!
//! - `gateway_e2e_test.rs` - Commands, telemetry and reconnects through the bus
//! - `tcp_device_test.rs` - Gateway driving a device over the TCP line protocol
//! - `ws_bridge_test.rs` - WebSocket client talking to a gateway through the bridge

// This crate only contains tests, no library code
