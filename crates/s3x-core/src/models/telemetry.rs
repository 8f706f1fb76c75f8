//! Telemetry models (device → bus)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pin::{PinKey, PinValue};

/// Report type carried in the `report` field of published events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    DigitalInput,
    AnalogInput,
    /// Latched value of an output pin, read on request
    Readback,
}

impl ReportKind {
    /// Analog readings are coalesced; digital edges never are
    pub fn is_coalesced(&self) -> bool {
        matches!(self, ReportKind::AnalogInput)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::DigitalInput => "digital_input",
            ReportKind::AnalogInput => "analog_input",
            ReportKind::Readback => "readback",
        }
    }
}

/// A value change published to the bus, identified by
/// `(device_id, pin, sequence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub key: PinKey,
    pub kind: ReportKind,
    pub value: PinValue,
    /// Strictly increasing per pin; gaps mean coalesced or dropped values
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryEvent {
    /// Wire payload published on the event topic
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "report": self.kind.as_str(),
            "device": self.key.device_id,
            "pin": self.key.pin,
            "value": self.value,
            "sequence": self.sequence,
            "timestamp": self.timestamp.timestamp_millis() as f64 / 1000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_payload_shape() {
        let event = TelemetryEvent {
            key: PinKey::new("arduino", 2),
            kind: ReportKind::AnalogInput,
            value: 512.0,
            sequence: 7,
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_500).unwrap(),
        };

        let payload = event.to_payload();
        assert_eq!(payload["report"], "analog_input");
        assert_eq!(payload["device"], "arduino");
        assert_eq!(payload["pin"], 2);
        assert_eq!(payload["value"], 512.0);
        assert_eq!(payload["sequence"], 7);
        assert_eq!(payload["timestamp"], 1_700_000_000.5);
    }
}
