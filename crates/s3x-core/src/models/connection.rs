//! Device connection model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of the transport session to the hardware
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// The live session to the hardware, owned by the gateway supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConnection {
    pub device_id: String,
    pub state: ConnectionState,
    /// Consecutive failed connection attempts since the last success
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_since: Option<DateTime<Utc>>,
}

impl DeviceConnection {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            state: ConnectionState::Disconnected,
            retry_count: 0,
            connected_since: None,
        }
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Successful connect resets the retry budget
    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.retry_count = 0;
        self.connected_since = Some(Utc::now());
    }

    /// Record a failed attempt or a lost connection
    pub fn mark_faulted(&mut self, failed_attempt: bool) {
        self.state = ConnectionState::Faulted;
        self.connected_since = None;
        if failed_attempt {
            self.retry_count += 1;
        }
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connected_since = None;
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}
