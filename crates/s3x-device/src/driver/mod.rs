//! Device driver adapters
//!
//! This module provides the driver implementations for talking to hardware:
//! - TCP adapter for boards speaking the JSON line protocol (directly over
//!   the network, or through a serial-to-TCP bridge)
//! - Mock adapter for testing and demos
//!
//! # Example
//!
//! ```ignore
//! use s3x_device::{create_driver, DeviceConfig};
//!
//! let config = DeviceConfig::default();
//! let driver = create_driver(&config)?;
//! driver.connect().await?;
//! driver.set_pin_mode(13, PinMode::Output).await?;
//! driver.write(13, 1.0).await?;
//! ```

pub mod mock;
pub mod tcp;

use std::sync::Arc;

use s3x_core::{DeviceDriver, DeviceError};

use crate::config::{DeviceConfig, TransportConfig};

/// Create a device driver based on configuration. The driver is returned
/// disconnected; the gateway supervisor owns the connection lifecycle.
pub fn create_driver(config: &DeviceConfig) -> Result<Arc<dyn DeviceDriver>, DeviceError> {
    let capabilities = config.capability_table();
    if capabilities.is_empty() {
        return Err(DeviceError::InvalidConfig(format!(
            "Device '{}' has no usable pins",
            config.device_id()
        )));
    }

    match &config.transport {
        TransportConfig::Tcp(cfg) => {
            if cfg.host.is_empty() {
                return Err(DeviceError::InvalidConfig(
                    "TCP transport requires a host".to_string(),
                ));
            }
            let driver = tcp::TcpDeviceDriver::new(config.family, capabilities, cfg.clone());
            Ok(Arc::new(driver))
        }
        TransportConfig::Mock(cfg) => {
            let driver = mock::MockDeviceDriver::new(config.family, capabilities, cfg.clone());
            Ok(Arc::new(driver))
        }
    }
}
