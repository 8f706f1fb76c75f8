//! Device families and per-family capability tables
//!
//! A capability table lists which pins exist on a device and which modes each
//! pin supports. Commands are validated against it before anything reaches
//! the hardware.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::models::{PinMode, PinNumber};

/// Hardware family served by a gateway process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Arduino Uno class boards (Firmata style)
    Arduino,
    Esp8266,
    Esp32,
    /// Raspberry Pi (BCM numbering)
    Rpi,
    /// Raspberry Pi Pico (RP2040)
    Pico,
    /// Circuit Playground Express
    Cpx,
    /// Robo HAT MM1
    Robohat,
    /// Scratch PicoBoard sensor board
    Picoboard,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 8] = [
        DeviceFamily::Arduino,
        DeviceFamily::Esp8266,
        DeviceFamily::Esp32,
        DeviceFamily::Rpi,
        DeviceFamily::Pico,
        DeviceFamily::Cpx,
        DeviceFamily::Robohat,
        DeviceFamily::Picoboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Arduino => "arduino",
            DeviceFamily::Esp8266 => "esp8266",
            DeviceFamily::Esp32 => "esp32",
            DeviceFamily::Rpi => "rpi",
            DeviceFamily::Pico => "pico",
            DeviceFamily::Cpx => "cpx",
            DeviceFamily::Robohat => "robohat",
            DeviceFamily::Picoboard => "picoboard",
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        DeviceFamily::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == lowered)
            .ok_or_else(|| format!("Unknown device family: '{}'", s))
    }
}

/// Pin → supported modes for one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTable {
    pins: BTreeMap<PinNumber, Vec<PinMode>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default table for a hardware family
    pub fn for_family(family: DeviceFamily) -> Self {
        use PinMode::*;

        let mut table = Self::new();
        match family {
            DeviceFamily::Arduino => {
                for pin in 2..=13 {
                    if [3, 5, 6, 9, 10, 11].contains(&pin) {
                        table.set(pin, &[Input, Output, Pwm, Servo]);
                    } else {
                        table.set(pin, &[Input, Output, Servo]);
                    }
                }
                // A0-A5
                for pin in 14..=19 {
                    table.set(pin, &[Input, Output, AnalogInput]);
                }
            }
            DeviceFamily::Esp8266 => {
                for pin in [0, 2, 4, 5, 12, 13, 14, 15] {
                    table.set(pin, &[Input, Output, Pwm, Servo]);
                }
                table.set(16, &[Input, Output]);
                // A0
                table.set(17, &[AnalogInput]);
            }
            DeviceFamily::Esp32 => {
                for pin in [
                    2, 4, 5, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23, 27,
                ] {
                    table.set(pin, &[Input, Output, Pwm, Servo]);
                }
                for pin in [25, 26] {
                    table.set(pin, &[Input, Output, Pwm, Servo, AnalogOutput]);
                }
                for pin in [32, 33] {
                    table.set(pin, &[Input, Output, Pwm, Servo, AnalogInput]);
                }
                // input only
                for pin in [34, 35, 36, 39] {
                    table.set(pin, &[Input, AnalogInput]);
                }
            }
            DeviceFamily::Rpi => {
                for pin in 2..=27 {
                    table.set(pin, &[Input, Output, Pwm, Servo]);
                }
            }
            DeviceFamily::Pico => {
                for pin in 0..=22 {
                    table.set(pin, &[Input, Output, Pwm, Servo]);
                }
                // onboard LED
                table.set(25, &[Output, Pwm]);
                for pin in 26..=28 {
                    table.set(pin, &[Input, Output, Pwm, Servo, AnalogInput]);
                }
            }
            DeviceFamily::Cpx => {
                table.set(0, &[Input, Output, AnalogInput, AnalogOutput]);
                for pin in 1..=7 {
                    if [4, 5].contains(&pin) {
                        table.set(pin, &[Input, Output, AnalogInput]);
                    } else {
                        table.set(pin, &[Input, Output, AnalogInput, Pwm, Servo]);
                    }
                }
            }
            DeviceFamily::Robohat => {
                for pin in 0..=7 {
                    table.set(pin, &[Output, Pwm, Servo]);
                }
                for pin in 8..=11 {
                    table.set(pin, &[Input, Output]);
                }
                for pin in 12..=15 {
                    table.set(pin, &[Input, AnalogInput]);
                }
            }
            DeviceFamily::Picoboard => {
                for pin in 0..=7 {
                    table.set(pin, &[AnalogInput]);
                }
                // button channel
                table.set(3, &[Input, AnalogInput]);
            }
        }
        table
    }

    /// Replace or add pin entries. An empty mode list removes the pin.
    pub fn with_overrides<I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (PinNumber, Vec<PinMode>)>,
    {
        for (pin, modes) in overrides {
            if modes.is_empty() {
                self.pins.remove(&pin);
            } else {
                self.set(pin, &modes);
            }
        }
        self
    }

    pub fn set(&mut self, pin: PinNumber, modes: &[PinMode]) {
        let mut list: Vec<PinMode> = Vec::with_capacity(modes.len());
        for mode in modes {
            if *mode != PinMode::Disabled && !list.contains(mode) {
                list.push(*mode);
            }
        }
        self.pins.insert(pin, list);
    }

    pub fn contains(&self, pin: PinNumber) -> bool {
        self.pins.contains_key(&pin)
    }

    /// Modes supported by a pin (`Disabled` is implicit)
    pub fn modes(&self, pin: PinNumber) -> Option<&[PinMode]> {
        self.pins.get(&pin).map(|m| m.as_slice())
    }

    pub fn supports(&self, pin: PinNumber, mode: PinMode) -> bool {
        match self.pins.get(&pin) {
            Some(modes) => mode == PinMode::Disabled || modes.contains(&mode),
            None => false,
        }
    }

    /// Validate a pin/mode pair
    pub fn check(&self, pin: PinNumber, mode: PinMode) -> Result<(), DeviceError> {
        self.check_pin(pin)?;
        if !self.supports(pin, mode) {
            return Err(DeviceError::UnsupportedMode { pin, mode });
        }
        Ok(())
    }

    pub fn check_pin(&self, pin: PinNumber) -> Result<(), DeviceError> {
        if self.contains(pin) {
            Ok(())
        } else {
            Err(DeviceError::InvalidPin(pin))
        }
    }

    pub fn pins(&self) -> impl Iterator<Item = PinNumber> + '_ {
        self.pins.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
