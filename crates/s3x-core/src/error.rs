//! Error types for gateways, device drivers and bus clients

use thiserror::Error;

use crate::models::{PinMode, PinNumber};

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// How far an error is allowed to propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Logged and dropped by the component that detected it
    Recoverable,
    /// Handled by the supervisor with backoff and reconnect
    Transient,
    /// Ends the gateway with a non-zero exit code
    Terminal,
}

/// Gateway error taxonomy
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Pin number outside the device's capability table
    #[error("Invalid pin: {0}")]
    InvalidPin(PinNumber),

    /// Mode not supported by this pin on this device family
    #[error("Unsupported mode {mode} for pin {pin}")]
    UnsupportedMode { pin: PinNumber, mode: PinMode },

    /// Device operation issued before the connection is up
    #[error("Device not ready")]
    DeviceNotReady,

    /// Command could not be parsed or is semantically invalid
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// Device-level failure that does not affect the connection
    #[error("Device error: {0}")]
    Device(String),

    /// Bus transport unreachable
    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    /// Bus failures exceeded the escalation threshold
    #[error("Bus connection lost: {0}")]
    BusConnectionLost(String),

    /// Transport session to the hardware dropped
    #[error("Device connection lost: {0}")]
    DeviceConnectionLost(String),

    /// Reconnect budget used up
    #[error("Retry exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify the error for the containment policy
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::InvalidPin(_)
            | GatewayError::UnsupportedMode { .. }
            | GatewayError::DeviceNotReady
            | GatewayError::MalformedCommand(_)
            | GatewayError::Device(_)
            | GatewayError::Internal(_) => ErrorClass::Recoverable,
            GatewayError::BusUnavailable(_)
            | GatewayError::BusConnectionLost(_)
            | GatewayError::DeviceConnectionLost(_) => ErrorClass::Transient,
            GatewayError::RetryExhausted { .. } | GatewayError::Config(_) => ErrorClass::Terminal,
        }
    }

    /// Whether the supervisor has to tear down and reconnect.
    /// A single `BusUnavailable` publish failure is not one of these.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            GatewayError::BusConnectionLost(_) | GatewayError::DeviceConnectionLost(_)
        )
    }
}

/// Errors reported by device driver adapters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Invalid pin: {0}")]
    InvalidPin(PinNumber),

    #[error("Unsupported mode {mode} for pin {pin}")]
    UnsupportedMode { pin: PinNumber, mode: PinMode },

    #[error("Device not ready")]
    NotReady,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}

impl From<DeviceError> for GatewayError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::InvalidPin(pin) => GatewayError::InvalidPin(pin),
            DeviceError::UnsupportedMode { pin, mode } => {
                GatewayError::UnsupportedMode { pin, mode }
            }
            DeviceError::NotReady => GatewayError::DeviceNotReady,
            DeviceError::ConnectionFailed(msg) | DeviceError::ConnectionLost(msg) => {
                GatewayError::DeviceConnectionLost(msg)
            }
            DeviceError::Timeout(msg) => GatewayError::Device(format!("timeout: {}", msg)),
            DeviceError::Protocol(msg) => GatewayError::Device(msg),
            DeviceError::InvalidConfig(msg) | DeviceError::Unsupported(msg) => {
                GatewayError::Config(msg)
            }
        }
    }
}

/// Errors reported by bus client adapters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Encoding(err.to_string())
    }
}

impl From<BusError> for GatewayError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Unavailable(msg) | BusError::ConnectionFailed(msg) => {
                GatewayError::BusUnavailable(msg)
            }
            BusError::InvalidTopic(msg) | BusError::Encoding(msg) => GatewayError::Internal(msg),
            BusError::InvalidConfig(msg) => GatewayError::Config(msg),
        }
    }
}
