//! Supervisor lifecycle states

use serde::{Deserialize, Serialize};

/// Gateway supervisor state
///
/// ```text
/// Idle → Connecting → Connected → Faulted → ShuttingDown → Stopped
///            ▲            │          │
///            └────────────┴──────────┘ (backoff, reconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Faulted,
    ShuttingDown,
    Stopped,
}

impl SupervisorState {
    /// Whether the supervisor is on its way out
    pub fn is_final(&self) -> bool {
        matches!(self, SupervisorState::ShuttingDown | SupervisorState::Stopped)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Connecting => "connecting",
            SupervisorState::Connected => "connected",
            SupervisorState::Faulted => "faulted",
            SupervisorState::ShuttingDown => "shutting_down",
            SupervisorState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SupervisorState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SupervisorState::Idle),
            "connecting" => Ok(SupervisorState::Connecting),
            "connected" => Ok(SupervisorState::Connected),
            "faulted" => Ok(SupervisorState::Faulted),
            "shutting_down" => Ok(SupervisorState::ShuttingDown),
            "stopped" => Ok(SupervisorState::Stopped),
            _ => Err(format!("Unknown supervisor state: {}", s)),
        }
    }
}
