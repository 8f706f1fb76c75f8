//! s3x-bus - Message bus clients for s3x gateways
//!
//! Implementations of [`BusClient`]:
//! - [`MqttBusClient`] for an MQTT broker (feature `mqtt`, on by default)
//! - [`MemoryBusClient`] attached to an in-process [`MemoryBroker`]
//!
//! # Example
//!
//! ```ignore
//! use s3x_bus::{create_bus, BusConfig};
//!
//! let bus = create_bus(&BusConfig::default())?;
//! bus.connect().await?;
//! bus.subscribe("from_arduino_gateway/#").await?;
//! ```

pub mod config;
pub mod memory;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use config::{BusConfig, MqttConfig};
pub use memory::{MemoryBroker, MemoryBusClient};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttBusClient;

pub use s3x_core::{BusClient, BusError, BusMessage};

use std::sync::Arc;

/// Create a bus client based on configuration. `Memory` gets a private
/// broker; attach clients to a shared [`MemoryBroker`] directly to link them.
pub fn create_bus(config: &BusConfig) -> Result<Arc<dyn BusClient>, BusError> {
    match config {
        BusConfig::Memory => Ok(Arc::new(MemoryBroker::new().client())),
        #[cfg(feature = "mqtt")]
        BusConfig::Mqtt(cfg) => {
            if cfg.host.is_empty() {
                return Err(BusError::InvalidConfig("MQTT host is empty".to_string()));
            }
            Ok(Arc::new(MqttBusClient::new(cfg.clone())))
        }
        #[cfg(not(feature = "mqtt"))]
        BusConfig::Mqtt(_) => Err(BusError::InvalidConfig(
            "MQTT requires the 'mqtt' feature".to_string(),
        )),
    }
}
