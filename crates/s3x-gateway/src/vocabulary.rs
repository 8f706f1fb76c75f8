//! Command vocabulary
//!
//! Maps the JSON bodies published by the block-language front-end onto
//! [`Command`]s. Field names and command names are configuration, not
//! constants: the defaults cover the neutral names (`set-pin-mode`,
//! `digital-write`, ...) and the block extension names (`set_mode_pwm`,
//! `servo_position`, ...).
//!
//! ```text
//! {"command": "set_mode_digital_output", "pin": 13}
//! {"command": "digital_write", "pin": 13, "value": 1}
//! {"command": "read-request", "pin": 14, "mode": "analog_input"}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use s3x_core::{
    BusMessage, Command, CommandKind, GatewayError, GatewayResult, PinMode, PinNumber, PinValue,
};

/// What a command name means
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandMapping {
    pub kind: CommandKind,
    /// Mode implied by the command name (e.g. `set_mode_pwm`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PinMode>,
}

impl CommandMapping {
    pub fn new(kind: CommandKind) -> Self {
        Self { kind, mode: None }
    }

    pub fn with_mode(kind: CommandKind, mode: PinMode) -> Self {
        Self {
            kind,
            mode: Some(mode),
        }
    }
}

/// `[vocabulary]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyConfig {
    #[serde(default = "default_command_field")]
    pub command_field: String,
    #[serde(default = "default_pin_field")]
    pub pin_field: String,
    #[serde(default = "default_value_field")]
    pub value_field: String,
    #[serde(default = "default_mode_field")]
    pub mode_field: String,
    /// Extra or overriding command names, merged over the defaults
    #[serde(default)]
    pub commands: BTreeMap<String, CommandMapping>,
}

fn default_command_field() -> String {
    "command".to_string()
}

fn default_pin_field() -> String {
    "pin".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

fn default_mode_field() -> String {
    "mode".to_string()
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            command_field: default_command_field(),
            pin_field: default_pin_field(),
            value_field: default_value_field(),
            mode_field: default_mode_field(),
            commands: BTreeMap::new(),
        }
    }
}

fn default_commands() -> BTreeMap<String, CommandMapping> {
    use CommandKind::*;

    let mut commands = BTreeMap::new();
    for kind in [SetPinMode, DigitalWrite, AnalogWrite, ReadRequest] {
        commands.insert(kind.to_string().replace('_', "-"), CommandMapping::new(kind));
    }

    let extension = [
        ("set_mode_digital_input", CommandMapping::with_mode(SetPinMode, PinMode::Input)),
        ("set_mode_analog_input", CommandMapping::with_mode(SetPinMode, PinMode::AnalogInput)),
        ("set_mode_digital_output", CommandMapping::with_mode(SetPinMode, PinMode::Output)),
        ("set_mode_pwm", CommandMapping::with_mode(SetPinMode, PinMode::Pwm)),
        ("set_mode_servo", CommandMapping::with_mode(SetPinMode, PinMode::Servo)),
        ("digital_write", CommandMapping::new(DigitalWrite)),
        ("pwm_write", CommandMapping::with_mode(AnalogWrite, PinMode::Pwm)),
        ("analog_write", CommandMapping::new(AnalogWrite)),
        ("servo_position", CommandMapping::with_mode(AnalogWrite, PinMode::Servo)),
    ];
    for (name, mapping) in extension {
        commands.insert(name.to_string(), mapping);
    }
    commands
}

/// Resolved vocabulary used by the translator
#[derive(Debug, Clone)]
pub struct Vocabulary {
    config: VocabularyConfig,
    commands: BTreeMap<String, CommandMapping>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(&VocabularyConfig::default())
    }
}

impl Vocabulary {
    pub fn new(config: &VocabularyConfig) -> Self {
        let mut commands = default_commands();
        commands.extend(config.commands.clone());
        Self {
            config: config.clone(),
            commands,
        }
    }

    /// Look up a command name (exact match first, then case-insensitive)
    pub fn lookup(&self, name: &str) -> Option<CommandMapping> {
        self.commands.get(name).copied().or_else(|| {
            let lower = name.trim().to_ascii_lowercase();
            self.commands.get(&lower).copied()
        })
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Parse an inbound bus message into a command
    pub fn parse(&self, message: &BusMessage) -> GatewayResult<Command> {
        let body = message
            .payload
            .as_object()
            .ok_or_else(|| malformed("body is not a JSON object"))?;

        let name = body
            .get(&self.config.command_field)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(format!("missing '{}'", self.config.command_field)))?;
        let mapping = self
            .lookup(name)
            .ok_or_else(|| malformed(format!("unknown command '{}'", name)))?;

        let pin = self.pin(body)?;
        let value = self.value(body)?;
        let mode = match body.get(&self.config.mode_field) {
            None | Some(Value::Null) => mapping.mode,
            Some(Value::String(s)) => Some(s.parse::<PinMode>().map_err(malformed)?),
            Some(other) => return Err(malformed(format!("invalid mode {}", other))),
        };

        Ok(Command {
            topic: message.topic.clone(),
            kind: mapping.kind,
            pin,
            mode,
            value,
        })
    }

    fn pin(&self, body: &Map<String, Value>) -> GatewayResult<PinNumber> {
        let field = &self.config.pin_field;
        let raw = match body.get(field) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            None => return Err(malformed(format!("missing '{}'", field))),
            _ => None,
        };
        raw.and_then(|n| PinNumber::try_from(n).ok())
            .ok_or_else(|| malformed(format!("'{}' is not a pin number", field)))
    }

    fn value(&self, body: &Map<String, Value>) -> GatewayResult<Option<PinValue>> {
        let field = &self.config.value_field;
        match body.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::Bool(b)) => Ok(Some(if *b { 1.0 } else { 0.0 })),
            Some(Value::String(s)) => s
                .trim()
                .parse::<PinValue>()
                .map(Some)
                .map_err(|_| malformed(format!("'{}' is not numeric", field))),
            Some(_) => Err(malformed(format!("'{}' is not numeric", field))),
        }
    }
}

fn malformed(reason: impl Into<String>) -> GatewayError {
    GatewayError::MalformedCommand(reason.into())
}
