//! Wire frames for the JSON line protocol
//!
//! Each frame is one JSON object terminated by `\n`.
//!
//! Gateway to device:
//! ```text
//! {"op":"set_pin_mode","pin":13,"mode":"output"}
//! {"op":"write","pin":13,"value":1.0}
//! {"op":"read","id":7,"pin":13}
//! {"op":"report","pin":14,"enable":true}
//! {"op":"reset"}
//! ```
//!
//! Device to gateway:
//! ```text
//! {"id":7,"value":1.0}             read response
//! {"id":7,"error":"..."}           read failure
//! {"report":"pin","pin":14,"value":512}
//! {"error":"..."}                  unsolicited error
//! ```

use serde::{Deserialize, Serialize};

use s3x_core::{DeviceError, PinMode, PinNumber, PinValue};

/// Frame sent to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SetPinMode { pin: PinNumber, mode: PinMode },
    Write { pin: PinNumber, value: PinValue },
    Read { id: u64, pin: PinNumber },
    Report { pin: PinNumber, enable: bool },
    Reset,
}

/// Frame received from the device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Response {
        id: u64,
        #[serde(default)]
        value: Option<PinValue>,
        #[serde(default)]
        error: Option<String>,
    },
    Report {
        report: String,
        pin: PinNumber,
        value: PinValue,
    },
    Error {
        error: String,
    },
}

/// Encode a request as one line, including the terminator
pub fn encode(request: &Request) -> Result<String, DeviceError> {
    let mut line =
        serde_json::to_string(request).map_err(|e| DeviceError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one line received from the device
pub fn decode(line: &str) -> Result<Inbound, DeviceError> {
    serde_json::from_str(line.trim())
        .map_err(|e| DeviceError::Protocol(format!("invalid frame '{}': {}", line.trim(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_requests() {
        assert_eq!(
            encode(&Request::SetPinMode {
                pin: 13,
                mode: PinMode::Output
            })
            .unwrap(),
            "{\"op\":\"set_pin_mode\",\"pin\":13,\"mode\":\"output\"}\n"
        );
        assert_eq!(encode(&Request::Reset).unwrap(), "{\"op\":\"reset\"}\n");
    }

    #[test]
    fn test_decode_inbound() {
        assert_eq!(
            decode("{\"id\":3,\"value\":1}").unwrap(),
            Inbound::Response {
                id: 3,
                value: Some(1.0),
                error: None
            }
        );
        assert_eq!(
            decode("{\"report\":\"pin\",\"pin\":14,\"value\":512}\r\n").unwrap(),
            Inbound::Report {
                report: "pin".to_string(),
                pin: 14,
                value: 512.0
            }
        );
        assert!(matches!(
            decode("{\"error\":\"brownout\"}").unwrap(),
            Inbound::Error { .. }
        ));
        assert!(decode("not json").is_err());
    }
}
