//! Command translator
//!
//! Turns bus commands into device driver calls. Every command is validated
//! against the device's capability table before the driver is touched, so a
//! rejected command causes no driver calls and no pin state changes.
//!
//! When an operation needs a different pin mode, the mode change and the
//! operation form one unit: the mode is set first, and if that fails the
//! operation is not attempted.

use std::sync::Arc;

use tracing::{debug, info};

use s3x_core::{
    BusMessage, Command, CommandKind, DeviceDriver, GatewayError, GatewayResult, PinMode,
    PinNumber, PinValue,
};

use crate::pin_table::PinStateTable;
use crate::reporter::ReporterHandle;
use crate::vocabulary::Vocabulary;

pub struct CommandTranslator {
    driver: Arc<dyn DeviceDriver>,
    pins: Arc<PinStateTable>,
    vocabulary: Arc<Vocabulary>,
    reporter: Option<ReporterHandle>,
}

impl CommandTranslator {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        pins: Arc<PinStateTable>,
        vocabulary: Arc<Vocabulary>,
    ) -> Self {
        Self {
            driver,
            pins,
            vocabulary,
            reporter: None,
        }
    }

    /// Route readbacks and mode-change flushes through a running reporter
    pub fn with_reporter(mut self, reporter: ReporterHandle) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Parse and execute one bus message
    pub async fn handle_message(&self, message: &BusMessage) -> GatewayResult<()> {
        let command = self.vocabulary.parse(message)?;
        self.execute(&command).await
    }

    /// Execute a parsed command
    pub async fn execute(&self, command: &Command) -> GatewayResult<()> {
        debug!(kind = %command.kind, pin = command.pin, "Executing command");
        match command.kind {
            CommandKind::SetPinMode => self.set_pin_mode(command).await,
            CommandKind::DigitalWrite => self.digital_write(command).await,
            CommandKind::AnalogWrite => self.analog_write(command).await,
            CommandKind::ReadRequest => self.read_request(command).await,
        }
    }

    fn check(&self, pin: PinNumber, mode: PinMode) -> GatewayResult<()> {
        self.driver
            .capabilities()
            .check(pin, mode)
            .map_err(GatewayError::from)
    }

    async fn set_pin_mode(&self, command: &Command) -> GatewayResult<()> {
        let mode = command
            .mode
            .ok_or_else(|| GatewayError::MalformedCommand("set-pin-mode without mode".into()))?;
        self.check(command.pin, mode)?;

        self.ensure_mode(command.pin, mode).await?;
        // Input modes are only useful while reporting
        if mode.supports_reporting() {
            self.ensure_reporting(command.pin).await?;
        }
        Ok(())
    }

    async fn digital_write(&self, command: &Command) -> GatewayResult<()> {
        if let Some(mode) = command.mode {
            if mode != PinMode::Output {
                return Err(GatewayError::MalformedCommand(format!(
                    "digital write in {} mode",
                    mode
                )));
            }
        }
        let value = match command.value {
            Some(v) if v == 0.0 || v == 1.0 => v,
            Some(v) => {
                return Err(GatewayError::MalformedCommand(format!(
                    "digital value must be 0 or 1, got {}",
                    v
                )))
            }
            None => return Err(GatewayError::MalformedCommand("missing value".into())),
        };
        self.check(command.pin, PinMode::Output)?;

        self.ensure_mode(command.pin, PinMode::Output).await?;
        self.write(command.pin, value).await
    }

    async fn analog_write(&self, command: &Command) -> GatewayResult<()> {
        let value = command
            .value
            .ok_or_else(|| GatewayError::MalformedCommand("missing value".into()))?;
        if !value.is_finite() || value < 0.0 {
            return Err(GatewayError::MalformedCommand(format!(
                "analog value must be a non-negative number, got {}",
                value
            )));
        }

        let mode = match command.mode {
            Some(mode) if mode.is_analog_output() => mode,
            Some(mode) => {
                return Err(GatewayError::MalformedCommand(format!(
                    "analog write in {} mode",
                    mode
                )))
            }
            None => self.default_analog_mode(command.pin)?,
        };
        self.check(command.pin, mode)?;

        self.ensure_mode(command.pin, mode).await?;
        self.write(command.pin, value).await
    }

    /// Keep the pin's current analog output mode; otherwise prefer a DAC
    /// over PWM
    fn default_analog_mode(&self, pin: PinNumber) -> GatewayResult<PinMode> {
        let current = self.pins.mode(pin);
        if current.is_analog_output() {
            return Ok(current);
        }
        let capabilities = self.driver.capabilities();
        capabilities.check_pin(pin)?;
        if capabilities.supports(pin, PinMode::AnalogOutput) {
            Ok(PinMode::AnalogOutput)
        } else {
            Ok(PinMode::Pwm)
        }
    }

    async fn read_request(&self, command: &Command) -> GatewayResult<()> {
        let mode = match command.mode {
            Some(mode) => mode,
            None => {
                self.driver.capabilities().check_pin(command.pin)?;
                self.pins.mode(command.pin)
            }
        };
        if mode == PinMode::Disabled {
            return Err(GatewayError::MalformedCommand(format!(
                "read-request for pin {} without a mode",
                command.pin
            )));
        }
        self.check(command.pin, mode)?;

        if mode.supports_reporting() {
            self.ensure_mode(command.pin, mode).await?;
            self.ensure_reporting(command.pin).await
        } else if mode.supports_sync_read() {
            self.ensure_mode(command.pin, mode).await?;
            let value = self.driver.read(command.pin).await?;
            let event = self.pins.record_readback(command.pin, value);
            if let Some(reporter) = &self.reporter {
                reporter.publish(event);
            }
            Ok(())
        } else {
            Err(GatewayError::MalformedCommand(format!(
                "pin {} cannot be read in {} mode",
                command.pin, mode
            )))
        }
    }

    /// Switch the pin to `mode` unless it is already there. The table only
    /// changes after the device accepted the mode.
    async fn ensure_mode(&self, pin: PinNumber, mode: PinMode) -> GatewayResult<()> {
        let current = self.pins.mode(pin);
        if current == mode {
            return Ok(());
        }

        if let Some(reporter) = &self.reporter {
            reporter.flush(pin);
        }
        if self.pins.is_reporting(pin) && !mode.supports_reporting() {
            self.driver.unregister_callback(pin).await?;
            self.pins.set_reporting(pin, false);
        }
        self.driver.set_pin_mode(pin, mode).await?;
        self.pins.set_mode(pin, mode);
        info!(pin, from = %current, to = %mode, "Pin mode changed");
        Ok(())
    }

    /// Register the device callback once per pin
    async fn ensure_reporting(&self, pin: PinNumber) -> GatewayResult<()> {
        if self.pins.is_reporting(pin) {
            debug!(pin, "Reporting already active");
            return Ok(());
        }
        self.driver.register_callback(pin).await?;
        self.pins.set_reporting(pin, true);
        Ok(())
    }

    async fn write(&self, pin: PinNumber, value: PinValue) -> GatewayResult<()> {
        self.driver.write(pin, value).await?;
        self.pins.record_write(pin, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use s3x_core::{DeviceFamily, PinKey};
    use s3x_device::{DriverCall, MockDeviceDriver};
    use serde_json::json;

    async fn setup() -> (Arc<MockDeviceDriver>, Arc<PinStateTable>, CommandTranslator) {
        let driver = Arc::new(MockDeviceDriver::for_family(DeviceFamily::Arduino));
        driver.connect().await.unwrap();
        driver.clear_calls();

        let pins = Arc::new(PinStateTable::new("arduino"));
        let translator = CommandTranslator::new(
            driver.clone(),
            pins.clone(),
            Arc::new(Vocabulary::default()),
        );
        (driver, pins, translator)
    }

    #[tokio::test]
    async fn test_mode_then_write() {
        let (driver, pins, translator) = setup().await;

        translator
            .execute(&Command::set_pin_mode(13, PinMode::Output))
            .await
            .unwrap();
        translator
            .execute(&Command::digital_write(13, 1.0))
            .await
            .unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::SetPinMode(13, PinMode::Output),
                DriverCall::Write(13, 1.0)
            ]
        );
        assert_eq!(pins.get(13).unwrap().last_value, Some(1.0));
        assert_eq!(pins.get(13).unwrap().sequence, 0);
    }

    #[tokio::test]
    async fn test_write_sets_missing_mode_first() {
        let (driver, pins, translator) = setup().await;

        translator
            .execute(&Command::analog_write(9, 128.0).with_mode(PinMode::Pwm))
            .await
            .unwrap();
        translator
            .execute(&Command::analog_write(9, 64.0))
            .await
            .unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::SetPinMode(9, PinMode::Pwm),
                DriverCall::Write(9, 128.0),
                DriverCall::Write(9, 64.0)
            ]
        );
        assert_eq!(pins.mode(9), PinMode::Pwm);
    }

    #[tokio::test]
    async fn test_failed_mode_change_skips_write() {
        let (driver, pins, translator) = setup().await;
        driver.drop_connection("unplugged");
        driver.clear_calls();

        let err = translator
            .execute(&Command::digital_write(13, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DeviceNotReady));
        assert_eq!(driver.calls(), vec![DriverCall::SetPinMode(13, PinMode::Output)]);
        assert_eq!(pins.mode(13), PinMode::Disabled);
    }

    #[tokio::test]
    async fn test_invalid_commands_touch_nothing() {
        let (driver, pins, translator) = setup().await;

        let invalid = [
            Command::set_pin_mode(99, PinMode::Output),
            Command::set_pin_mode(13, PinMode::AnalogInput),
            Command::digital_write(99, 1.0),
            Command::digital_write(13, 5.0),
            Command::analog_write(2, 100.0).with_mode(PinMode::Pwm),
            Command::read_request(99),
            Command::read_request(13),
        ];
        for command in invalid {
            assert!(translator.execute(&command).await.is_err(), "{:?}", command);
        }

        assert!(driver.calls().is_empty());
        assert!(pins.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_idempotent() {
        let (driver, pins, translator) = setup().await;
        let command = Command::read_request(14).with_mode(PinMode::AnalogInput);

        translator.execute(&command).await.unwrap();
        translator.execute(&command).await.unwrap();

        assert_eq!(
            driver.count_calls(|c| matches!(c, DriverCall::RegisterCallback(14))),
            1
        );
        assert_eq!(
            driver.count_calls(|c| matches!(c, DriverCall::SetPinMode(14, _))),
            1
        );
        assert!(pins.is_reporting(14));
    }

    #[tokio::test]
    async fn test_read_request_on_output_reads_back() {
        let (driver, pins, translator) = setup().await;
        translator
            .execute(&Command::digital_write(13, 1.0))
            .await
            .unwrap();
        translator
            .execute(&Command::read_request(13))
            .await
            .unwrap();

        assert_eq!(driver.count_calls(|c| matches!(c, DriverCall::Read(13))), 1);
        let pin = pins.get(13).unwrap();
        assert_eq!(pin.key, PinKey::new("arduino", 13));
        assert_eq!(pin.sequence, 1);
    }

    #[tokio::test]
    async fn test_leaving_input_mode_stops_reporting() {
        let (driver, pins, translator) = setup().await;
        translator
            .execute(&Command::set_pin_mode(2, PinMode::Input))
            .await
            .unwrap();
        translator
            .execute(&Command::digital_write(2, 1.0))
            .await
            .unwrap();

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::SetPinMode(2, PinMode::Input),
                DriverCall::RegisterCallback(2),
                DriverCall::UnregisterCallback(2),
                DriverCall::SetPinMode(2, PinMode::Output),
                DriverCall::Write(2, 1.0)
            ]
        );
        assert!(!driver.is_reporting(2));
        assert!(!pins.is_reporting(2));
    }

    #[tokio::test]
    async fn test_unknown_command_is_malformed() {
        let (driver, _pins, translator) = setup().await;
        let message = BusMessage::new(
            "to_arduino_gateway",
            json!({"command": "play_tone", "pin": 3}),
        );

        let err = translator.handle_message(&message).await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCommand(_)));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_extension_vocabulary_end_to_end() {
        let (driver, _pins, translator) = setup().await;
        for payload in [
            json!({"command": "set_mode_servo", "pin": 9}),
            json!({"command": "servo_position", "pin": 9, "value": 90}),
        ] {
            translator
                .handle_message(&BusMessage::new("to_arduino_gateway", payload))
                .await
                .unwrap();
        }

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::SetPinMode(9, PinMode::Servo),
                DriverCall::Write(9, 90.0)
            ]
        );
    }
}
