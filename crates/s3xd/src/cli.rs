//! Command-line arguments and how they override the configuration file

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};

use s3x_bus::{BusConfig, MqttConfig};
use s3x_core::DeviceFamily;
use s3x_device::{MockConfig, PinCapabilityOverride, TcpConfig, TransportConfig};
use s3x_gateway::GatewayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    /// In-process broker (local testing only)
    Memory,
    /// MQTT broker
    Mqtt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "s3xd")]
#[command(version, about = "Gateway between the s3x message bus and one hardware device")]
pub struct Args {
    /// Configuration file (TOML, or YAML with a .yaml/.yml extension)
    #[arg(short, long, env = "S3X_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device family (arduino, esp8266, esp32, rpi, pico, cpx, robohat, picoboard)
    #[arg(short, long)]
    pub family: Option<DeviceFamily>,

    /// Device id used in topics (defaults to the family name)
    #[arg(long)]
    pub device_id: Option<String>,

    /// Device address host[:port] for the TCP transport
    #[arg(short, long, conflicts_with = "mock")]
    pub address: Option<String>,

    /// Use the simulated device
    #[arg(long)]
    pub mock: bool,

    /// Bus transport
    #[arg(long, value_enum)]
    pub bus: Option<BusKind>,

    /// Bus broker host
    #[arg(long, env = "S3X_BUS_HOST")]
    pub bus_host: Option<String>,

    /// Bus broker port
    #[arg(long, env = "S3X_BUS_PORT")]
    pub bus_port: Option<u16>,

    /// Capability override PIN=mode[,mode...] (repeatable)
    #[arg(long = "pin-modes", value_name = "PIN=MODES")]
    pub pin_modes: Vec<PinCapabilityOverride>,

    /// Analog coalescing window in milliseconds (0 disables)
    #[arg(long)]
    pub coalesce_ms: Option<u64>,

    /// Consecutive failed connection attempts before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    /// Load the configuration file (or defaults) and apply the flags
    pub fn gateway_config(&self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load(path)?,
            None => GatewayConfig::default(),
        };
        self.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut GatewayConfig) -> Result<()> {
        if let Some(family) = self.family {
            config.device.family = family;
        }
        if let Some(id) = &self.device_id {
            config.device.id = Some(id.clone());
        }

        if let Some(address) = &self.address {
            let tcp = TcpConfig::from_address(address).map_err(|e| anyhow!(e))?;
            config.device.transport = TransportConfig::Tcp(tcp);
        } else if self.mock && !matches!(config.device.transport, TransportConfig::Mock(_)) {
            config.device.transport = TransportConfig::Mock(MockConfig::default());
        }
        config.device.capabilities.extend(self.pin_modes.iter().cloned());

        let wants_mqtt = self.bus == Some(BusKind::Mqtt)
            || (self.bus.is_none() && (self.bus_host.is_some() || self.bus_port.is_some()));
        if self.bus == Some(BusKind::Memory) {
            config.bus = BusConfig::Memory;
        } else if wants_mqtt {
            let mut mqtt = match &config.bus {
                BusConfig::Mqtt(mqtt) => mqtt.clone(),
                BusConfig::Memory => MqttConfig::default(),
            };
            if let Some(host) = &self.bus_host {
                mqtt.host = host.clone();
            }
            if let Some(port) = self.bus_port {
                mqtt.port = port;
            }
            config.bus = BusConfig::Mqtt(mqtt);
        }

        if let Some(window) = self.coalesce_ms {
            config.telemetry.coalesce_window_ms = window;
        }
        if let Some(max_retries) = self.max_retries {
            config.supervisor.max_retries = max_retries;
        }
        Ok(())
    }
}
