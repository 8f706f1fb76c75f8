//! Pin models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::telemetry::ReportKind;

/// Pin number as exposed by the device family (GPIO / board numbering)
pub type PinNumber = u8;

/// Numeric pin value. Digital pins use 0/1, PWM a duty cycle, servo an angle,
/// analog inputs the raw converter reading.
pub type PinValue = f64;

/// Identity of a pin: the owning device plus its number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PinKey {
    pub device_id: String,
    pub pin: PinNumber,
}

impl PinKey {
    pub fn new(device_id: impl Into<String>, pin: PinNumber) -> Self {
        Self {
            device_id: device_id.into(),
            pin,
        }
    }
}

impl std::fmt::Display for PinKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device_id, self.pin)
    }
}

/// Operating mode of a pin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    /// Digital input
    Input,
    /// Digital output
    Output,
    /// Analog (ADC) input
    AnalogInput,
    /// Analog (DAC) output
    AnalogOutput,
    /// PWM output
    Pwm,
    /// Servo output (angle)
    Servo,
    /// Not configured
    #[default]
    Disabled,
}

impl PinMode {
    pub const ALL: [PinMode; 7] = [
        PinMode::Input,
        PinMode::Output,
        PinMode::AnalogInput,
        PinMode::AnalogOutput,
        PinMode::Pwm,
        PinMode::Servo,
        PinMode::Disabled,
    ];

    /// Kind of telemetry this mode produces when reporting is enabled
    pub fn report_kind(&self) -> Option<ReportKind> {
        match self {
            PinMode::Input => Some(ReportKind::DigitalInput),
            PinMode::AnalogInput => Some(ReportKind::AnalogInput),
            _ => None,
        }
    }

    /// Whether the device can report this pin asynchronously
    pub fn supports_reporting(&self) -> bool {
        self.report_kind().is_some()
    }

    /// Whether the device latches a value that can be read back synchronously
    pub fn supports_sync_read(&self) -> bool {
        matches!(
            self,
            PinMode::Output | PinMode::AnalogOutput | PinMode::Pwm | PinMode::Servo
        )
    }

    /// Whether `write` accepts values in this mode
    pub fn is_writable(&self) -> bool {
        self.supports_sync_read()
    }

    /// Modes driven by numeric (non-binary) writes
    pub fn is_analog_output(&self) -> bool {
        matches!(
            self,
            PinMode::AnalogOutput | PinMode::Pwm | PinMode::Servo
        )
    }
}

impl std::fmt::Display for PinMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PinMode::Input => "input",
            PinMode::Output => "output",
            PinMode::AnalogInput => "analog_input",
            PinMode::AnalogOutput => "analog_output",
            PinMode::Pwm => "pwm",
            PinMode::Servo => "servo",
            PinMode::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PinMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "input" | "digital_input" => Ok(PinMode::Input),
            "output" | "digital_output" => Ok(PinMode::Output),
            "analog_input" | "analog" => Ok(PinMode::AnalogInput),
            "analog_output" | "dac" => Ok(PinMode::AnalogOutput),
            "pwm" => Ok(PinMode::Pwm),
            "servo" => Ok(PinMode::Servo),
            "disabled" => Ok(PinMode::Disabled),
            _ => Err(format!("Unknown pin mode: '{}'", s)),
        }
    }
}

/// Authoritative record of one pin, owned by the pin state table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub key: PinKey,
    /// Configured mode (last successful `set_pin_mode`)
    pub mode: PinMode,
    /// Last known value, written by commands or device reports
    pub last_value: Option<PinValue>,
    pub last_update: Option<DateTime<Utc>>,
    /// Whether a device callback is registered for this pin
    pub reporting: bool,
    /// Last telemetry sequence number assigned to this pin (0 = none yet)
    pub sequence: u64,
}

impl Pin {
    /// New pin entry in the default (disabled) mode
    pub fn new(key: PinKey) -> Self {
        Self {
            key,
            mode: PinMode::Disabled,
            last_value: None,
            last_update: None,
            reporting: false,
            sequence: 0,
        }
    }
}
