//! Device configuration
//!
//! Family selection, transport settings and capability overrides.

use serde::{Deserialize, Serialize};

use s3x_core::{CapabilityTable, DeviceFamily, PinMode, PinNumber};

/// Configuration for the device side of a gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hardware family
    #[serde(default = "default_family")]
    pub family: DeviceFamily,
    /// Device identifier used in topics and pin keys (defaults to the family name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Capability table overrides
    #[serde(default)]
    pub capabilities: Vec<PinCapabilityOverride>,
}

fn default_family() -> DeviceFamily {
    DeviceFamily::Arduino
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            family: default_family(),
            id: None,
            transport: TransportConfig::default(),
            capabilities: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            ..Default::default()
        }
    }

    /// Device identifier
    pub fn device_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| self.family.as_str().to_string())
    }

    /// Family defaults with the configured overrides applied
    pub fn capability_table(&self) -> CapabilityTable {
        CapabilityTable::for_family(self.family).with_overrides(
            self.capabilities
                .iter()
                .map(|o| (o.pin, o.modes.clone())),
        )
    }
}

/// Replace the supported modes of one pin (empty list removes the pin)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinCapabilityOverride {
    pub pin: PinNumber,
    #[serde(default)]
    pub modes: Vec<PinMode>,
}

impl std::str::FromStr for PinCapabilityOverride {
    type Err = String;

    /// Parse `PIN=mode,mode` (e.g. `13=input,output`, `2=` removes pin 2)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pin, modes) = s
            .split_once('=')
            .ok_or_else(|| format!("Expected PIN=mode[,mode...], got '{}'", s))?;
        let pin: PinNumber = pin
            .trim()
            .parse()
            .map_err(|_| format!("Invalid pin number: '{}'", pin))?;
        let modes = modes
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::parse::<PinMode>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pin, modes })
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Newline-delimited JSON over TCP (network boards or a serial bridge)
    Tcp(TcpConfig),
    /// Simulated device
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Device host name or IP address
    pub host: String,
    /// Device TCP port
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Timeout for synchronous reads in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    31335
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_response_timeout() -> u64 {
    2000
}

impl TcpConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout_ms: default_connect_timeout(),
            response_timeout_ms: default_response_timeout(),
        }
    }

    /// Parse `host:port` (port optional)
    pub fn from_address(address: &str) -> Result<Self, String> {
        match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| format!("Invalid port in address '{}'", address))?;
                Ok(Self::new(host, port))
            }
            None if !address.is_empty() => Ok(Self::new(address, default_tcp_port())),
            None => Err("Empty device address".to_string()),
        }
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Emit synthetic readings for reporting pins at this interval (0 disables)
    #[serde(default)]
    pub synthetic_interval_ms: u64,
    /// Fail this many connection attempts before succeeding
    #[serde(default)]
    pub fail_connects: u32,
}
