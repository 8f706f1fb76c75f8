//! Command models (bus → device)

use serde::{Deserialize, Serialize};

use super::pin::{PinMode, PinNumber, PinValue};

/// Kind of operation requested by a command message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Configure the pin mode
    SetPinMode,
    /// Write 0/1 to a digital output
    DigitalWrite,
    /// Write a numeric value to a PWM / servo / DAC output
    AnalogWrite,
    /// Start reporting a pin's value
    ReadRequest,
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommandKind::SetPinMode => "set_pin_mode",
            CommandKind::DigitalWrite => "digital_write",
            CommandKind::AnalogWrite => "analog_write",
            CommandKind::ReadRequest => "read_request",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "set_pin_mode" => Ok(CommandKind::SetPinMode),
            "digital_write" => Ok(CommandKind::DigitalWrite),
            "analog_write" => Ok(CommandKind::AnalogWrite),
            "read_request" => Ok(CommandKind::ReadRequest),
            _ => Err(format!("Unknown command kind: '{}'", s)),
        }
    }
}

/// A parsed inbound command. Transient: consumed once by the translator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Topic the command arrived on
    pub topic: String,
    pub kind: CommandKind,
    pub pin: PinNumber,
    /// Requested mode (explicit, or implied by the command name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PinMode>,
    /// Value for write commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PinValue>,
}

impl Command {
    pub fn set_pin_mode(pin: PinNumber, mode: PinMode) -> Self {
        Self {
            topic: String::new(),
            kind: CommandKind::SetPinMode,
            pin,
            mode: Some(mode),
            value: None,
        }
    }

    pub fn digital_write(pin: PinNumber, value: PinValue) -> Self {
        Self {
            topic: String::new(),
            kind: CommandKind::DigitalWrite,
            pin,
            mode: None,
            value: Some(value),
        }
    }

    pub fn analog_write(pin: PinNumber, value: PinValue) -> Self {
        Self {
            topic: String::new(),
            kind: CommandKind::AnalogWrite,
            pin,
            mode: None,
            value: Some(value),
        }
    }

    pub fn read_request(pin: PinNumber) -> Self {
        Self {
            topic: String::new(),
            kind: CommandKind::ReadRequest,
            pin,
            mode: None,
            value: None,
        }
    }

    /// Attach the implied or explicit mode
    pub fn with_mode(mut self, mode: PinMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind_parse() {
        assert_eq!(
            "set-pin-mode".parse::<CommandKind>(),
            Ok(CommandKind::SetPinMode)
        );
        assert_eq!(
            "read_request".parse::<CommandKind>(),
            Ok(CommandKind::ReadRequest)
        );
        assert!("explode".parse::<CommandKind>().is_err());
    }

    #[test]
    fn test_builders() {
        let cmd = Command::analog_write(9, 128.0).with_mode(PinMode::Pwm);
        assert_eq!(cmd.kind, CommandKind::AnalogWrite);
        assert_eq!(cmd.mode, Some(PinMode::Pwm));
        assert_eq!(cmd.value, Some(128.0));
    }
}
